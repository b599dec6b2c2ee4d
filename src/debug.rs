use alloc::{collections::VecDeque, string::String};
use core::{fmt, ptr::NonNull};

use crate::{AvlTree, Linked, Links};

impl<T, Tag> AvlTree<T, Tag>
where
    T: Linked<Links<T, Tag>> + ?Sized,
{
    /// Writes a Graphviz rendering of the tree to `w`.
    ///
    /// Each node is labeled with `label(node)` and its skew. Missing children are drawn as points
    /// so that left and right children can be told apart.
    pub fn dotgraph<W, D, L>(&self, name: &str, mut w: W, label: L) -> fmt::Result
    where
        W: fmt::Write,
        D: fmt::Display,
        L: Fn(&T) -> D,
    {
        let Some(root) = self.root else {
            return write!(w, "digraph \"graph-{name}\" {{}}");
        };

        enum Item<T: ?Sized> {
            Node(NonNull<T>, usize),
            Missing(usize),
        }

        let mut next_id = 0;
        let mut queue = VecDeque::new();
        queue.push_back(Item::Node(root, next_id));
        next_id += 1;

        write!(
            w,
            "digraph \"graph-{name}\" {{\n subgraph \"subgraph-{name}\" {{"
        )?;

        let mut edges = String::new();

        while !queue.is_empty() {
            use fmt::Write;

            write!(w, "{{rank=same; ")?;

            for _ in 0..queue.len() {
                let Some(item) = queue.pop_front() else {
                    break;
                };

                let (node, id) = match item {
                    Item::Node(node, id) => (node, id),
                    Item::Missing(id) => {
                        write!(w, "\"graph{name}-{id}\" [shape=point]; ")?;
                        continue;
                    }
                };

                let links = unsafe { Self::links(node) };
                let text = label(unsafe { node.as_ref() });
                write!(
                    w,
                    "\"graph{name}-{id}\" [label=\"{text}:{skew}\"]; ",
                    skew = links.skew()
                )?;

                for child in [links.left(), links.right()] {
                    let child_id = next_id;
                    next_id += 1;

                    queue.push_back(match child {
                        Some(child) => Item::Node(child, child_id),
                        None => Item::Missing(child_id),
                    });

                    writeln!(edges, "\"graph{name}-{id}\" -> \"graph{name}-{child_id}\";")?;
                }
            }

            writeln!(w, "}}")?;
        }

        w.write_str(&edges)?;

        w.write_str(" }\n}")
    }
}
