//! Indexes one set of employee records two ways at once: by name and by badge number.
//!
//! Run with `RUST_LOG=debug` to see the directory's bookkeeping.

use std::{cmp::Ordering, pin::Pin, ptr::NonNull};

use cordyceps_avl::{AvlTree, Linked, Links};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

enum ByName {}
enum ByNumber {}

#[derive(Debug)]
struct Employee {
    name_links: Links<Employee, ByName>,
    number_links: Links<Employee, ByNumber>,
    first: String,
    last: String,
    number: u32,
}

impl Employee {
    fn new(first: &str, last: &str, number: u32) -> Pin<Box<Employee>> {
        Box::pin(Employee {
            name_links: Links::new(),
            number_links: Links::new(),
            first: first.into(),
            last: last.into(),
            number,
        })
    }
}

// The name index owns the records.
unsafe impl Linked<Links<Employee, ByName>> for Employee {
    type Handle = Pin<Box<Employee>>;

    fn into_ptr(r: Self::Handle) -> NonNull<Self> {
        unsafe { NonNull::from(Box::leak(Pin::into_inner_unchecked(r))) }
    }

    unsafe fn from_ptr(ptr: NonNull<Self>) -> Self::Handle {
        unsafe { Pin::new_unchecked(Box::from_raw(ptr.as_ptr())) }
    }

    unsafe fn links(ptr: NonNull<Self>) -> NonNull<Links<Employee, ByName>> {
        let ptr = ptr.as_ptr();
        unsafe { NonNull::new_unchecked(std::ptr::addr_of_mut!((*ptr).name_links)) }
    }
}

// The number index only borrows them.
unsafe impl Linked<Links<Employee, ByNumber>> for Employee {
    type Handle = NonNull<Employee>;

    fn into_ptr(r: Self::Handle) -> NonNull<Self> {
        r
    }

    unsafe fn from_ptr(ptr: NonNull<Self>) -> Self::Handle {
        ptr
    }

    unsafe fn links(ptr: NonNull<Self>) -> NonNull<Links<Employee, ByNumber>> {
        let ptr = ptr.as_ptr();
        unsafe { NonNull::new_unchecked(std::ptr::addr_of_mut!((*ptr).number_links)) }
    }
}

/// Orders by last name, then first name.
fn cmp_names(key: &(&str, &str), employee: &Employee) -> Ordering {
    let (first, last) = *key;

    last.cmp(&employee.last).then_with(|| first.cmp(&employee.first))
}

fn cmp_numbers(key: &u32, employee: &Employee) -> Ordering {
    key.cmp(&employee.number)
}

#[derive(Default)]
struct Directory {
    by_name: AvlTree<Employee, ByName>,
    by_number: AvlTree<Employee, ByNumber>,
}

impl Directory {
    /// Adds `employee` to both indexes, or to neither if either key is taken.
    fn hire(&mut self, employee: Pin<Box<Employee>>) -> bool {
        if self.by_number.contains(&employee.number, cmp_numbers) {
            warn!(number = employee.number, "badge number already assigned");
            return false;
        }

        let number = employee.number;
        let name = (employee.first.clone(), employee.last.clone());
        let key = (name.0.as_str(), name.1.as_str());

        if let Err(err) = self.by_name.try_add(&key, cmp_names, employee) {
            warn!(
                existing = err.existing.number,
                rejected = err.item.number,
                "{err}"
            );
            return false;
        }

        // The number index writes to the record's links, so borrow it mutably from its owner.
        let Some(ptr) = self
            .by_name
            .get_mut(&key, cmp_names)
            .map(|record| NonNull::from(unsafe { record.get_unchecked_mut() }))
        else {
            return false;
        };

        let added = self.by_number.try_add(&number, cmp_numbers, ptr);
        debug_assert!(added.is_ok());

        debug!(first = %name.0, last = %name.1, number, "hired");
        true
    }

    fn fire(&mut self, number: u32) -> Option<Pin<Box<Employee>>> {
        let ptr = self.by_number.remove(&number, cmp_numbers)?;

        // SAFETY: every record in the number index is also in the name index.
        Some(unsafe { self.by_name.remove_node(ptr) })
    }

    fn print_by_name(&self) {
        let mut cur = self.by_name.first();

        while let Some(employee) = cur {
            info!(
                "{:>4}  {}, {}",
                employee.number, employee.last, employee.first
            );

            // SAFETY: `employee` came from `by_name`.
            cur = unsafe { self.by_name.next(&employee) };
        }
    }
}

impl Drop for Directory {
    fn drop(&mut self) {
        // Unlink the borrowed handles before the owning index frees the records.
        self.by_number.clear();
        self.by_name.free_all(|employee| {
            debug!(number = employee.number, "dropping record");
        });
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "employees=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut directory = Directory::default();

    for (first, last, number) in [
        ("Grace", "Hopper", 7),
        ("Ada", "Lovelace", 3),
        ("Alan", "Turing", 12),
        ("Edsger", "Dijkstra", 1),
        ("Barbara", "Liskov", 9),
        ("Ada", "Lovelace", 4),
        ("Ken", "Thompson", 12),
    ] {
        directory.hire(Employee::new(first, last, number));
    }

    info!(count = directory.by_name.len(), "employees by name:");
    directory.print_by_name();

    if let Some(ada) = directory.by_name.get(&("Ada", "Lovelace"), cmp_names) {
        info!(number = ada.number, "found Ada Lovelace");
    }

    info!("employees by number, highest first:");
    for employee in directory.by_number.iter().rev() {
        info!("{:>4}  {} {}", employee.number, employee.first, employee.last);
    }

    if let Some(fired) = directory.fire(7) {
        info!(first = %fired.first, last = %fired.last, "fired");
    }

    directory.by_name.assert_invariants();
    directory.by_number.assert_invariants();
    info!(
        by_name = directory.by_name.len(),
        by_number = directory.by_number.len(),
        "remaining"
    );
}
