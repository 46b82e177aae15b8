//! Mapped lists.
//!
//! A [`MapList`] holds `f(x)` for every element `x` of its source, index for
//! index. Only the elements named by a change block are mapped again.

use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use super::observable::ObservableList;
use crate::error::Result;
use crate::event::{ChangeEvent, ChangeKind, ListEventListener};
use crate::graph::NodeKind;

/// What happened to one source element during the current event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Clean,
    Updated,
    /// Not mirrored in the output yet.
    Inserted,
}

/// A live 1:1 projection of a source list.
pub struct MapList<S, T> {
    source: Arc<ObservableList<S>>,
    output: Arc<ObservableList<T>>,
    map: Box<dyn Fn(&S) -> T + Send + Sync>,

    /// Serializes event handling.
    busy: Mutex<()>,
}

impl<S, T> MapList<S, T>
where
    S: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Create a projection of `source` through `map`.
    pub fn new<F>(source: &Arc<ObservableList<S>>, map: F) -> Result<Arc<Self>>
    where
        F: Fn(&S) -> T + Send + Sync + 'static,
    {
        let publisher = source.publisher();
        let _guard = publisher.lock();

        let mapped: Vec<T> = source.with_items(|items| items.iter().map(&map).collect());
        let list = Arc::new(Self {
            source: Arc::clone(source),
            output: Arc::new(ObservableList::with_kind(publisher, NodeKind::Derived, mapped)),
            map: Box::new(map),
            busy: Mutex::new(()),
        });

        let strong: Arc<dyn ListEventListener> = list.clone();
        publisher.attach_listener(list.output.id(), Arc::downgrade(&strong))?;
        source.subscribe(list.output.id())?;
        Ok(list)
    }

    /// The list being projected.
    pub fn source(&self) -> &Arc<ObservableList<S>> {
        &self.source
    }

    /// The projected output list.
    pub fn list(&self) -> &Arc<ObservableList<T>> {
        &self.output
    }

    /// Map every source element again and replace the output wholesale.
    fn resync(&self) {
        let mapped: Vec<T> = self
            .source
            .with_items(|items| items.iter().map(|item| (self.map)(item)).collect());

        warn!(len = mapped.len(), "rebuilding mapped list");
        self.output.clear();
        self.output.extend(mapped);
    }
}

impl<S, T> ListEventListener for MapList<S, T>
where
    S: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn list_changed(&self, event: ChangeEvent) {
        let _busy = self.busy.lock();
        let mut marks = vec![Mark::Clean; self.output.len()];
        let mut in_step = true;

        for block in event {
            match block.kind() {
                ChangeKind::Insert => {
                    if block.start() > marks.len() {
                        in_step = false;
                        continue;
                    }
                    for index in block.range() {
                        marks.insert(index, Mark::Inserted);
                    }
                }
                ChangeKind::Delete => {
                    let start = block.start();
                    for _ in block.range() {
                        if start >= marks.len() {
                            in_step = false;
                            break;
                        }
                        if marks.remove(start) == Mark::Inserted {
                            continue;
                        }
                        let out = marks[..start]
                            .iter()
                            .filter(|mark| **mark != Mark::Inserted)
                            .count();
                        if let Err(err) = self.output.remove(out) {
                            warn!(%err, start, "failed to remove mapped element");
                            in_step = false;
                        }
                    }
                }
                ChangeKind::Update => {
                    for index in block.range() {
                        if let Some(mark @ Mark::Clean) = marks.get_mut(index) {
                            *mark = Mark::Updated;
                        }
                    }
                }
            }
        }

        // Everything before the cursor is mirrored, so output indices equal
        // source indices from here on.
        let items = self.source.snapshot();
        if !in_step || marks.len() != items.len() {
            warn!(
                marks = marks.len(),
                source = items.len(),
                "mapped list out of step with source"
            );
            self.resync();
            return;
        }
        for (index, mark) in marks.into_iter().enumerate() {
            let item = &items[index];
            let applied = match mark {
                Mark::Clean => Ok(()),
                Mark::Updated => self.output.set(index, (self.map)(item)).map(drop),
                Mark::Inserted => self.output.insert(index, (self.map)(item)),
            };
            if let Err(err) = applied {
                warn!(%err, index, "failed to apply mapped change");
                self.resync();
                return;
            }
        }
    }
}

impl<S, T> Deref for MapList<S, T> {
    type Target = ObservableList<T>;

    fn deref(&self) -> &Self::Target {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Publisher;

    #[test]
    fn map_mirrors_source() {
        let publisher = Publisher::new();
        let source = Arc::new(ObservableList::from_vec(&publisher, vec![1, 2, 3]));
        let doubled = MapList::new(&source, |x: &i32| x * 2).unwrap();
        assert_eq!(doubled.snapshot(), vec![2, 4, 6]);

        source.push(4);
        source.insert(0, 0).unwrap();
        source.set(2, 20).unwrap();
        source.remove(1).unwrap();
        assert_eq!(doubled.snapshot(), vec![0, 40, 6, 8]);
    }

    #[test]
    fn map_handles_batched_blocks() {
        let publisher = Publisher::new();
        let source = Arc::new(ObservableList::from_vec(&publisher, vec![1, 2, 3, 4]));
        let labels = MapList::new(&source, |x: &i32| format!("#{x}")).unwrap();

        source.batch(|source| {
            source.push(5);
            source.remove(0).unwrap();
            source.set(0, 9).unwrap();
            source.insert(2, 7).unwrap();
            source.remove(4).unwrap();
        });

        assert_eq!(source.snapshot(), vec![9, 3, 7, 4]);
        assert_eq!(labels.snapshot(), vec!["#9", "#3", "#7", "#4"]);
    }

    #[test]
    fn output_out_of_step_is_rebuilt() {
        let publisher = Publisher::new();
        let source = Arc::new(ObservableList::from_vec(&publisher, vec![1, 2, 3]));
        let doubled = MapList::new(&source, |x: &i32| x * 2).unwrap();

        // Writing to the output directly breaks its link to the source.
        doubled.list().remove(0).unwrap();
        source.set(2, 5).unwrap();
        assert_eq!(doubled.snapshot(), vec![2, 4, 10]);

        source.push(6);
        assert_eq!(doubled.snapshot(), vec![2, 4, 10, 12]);
    }

    #[test]
    fn map_over_filter() {
        use crate::list::FilterList;

        let publisher = Publisher::new();
        let source = Arc::new(ObservableList::from_vec(&publisher, vec![1, 2, 3, 4]));
        let odd = FilterList::new(&source, |x| x % 2 == 1).unwrap();
        let squares = MapList::new(odd.list(), |x: &i32| x * x).unwrap();
        assert_eq!(squares.snapshot(), vec![1, 9]);

        source.clear();
        source.extend([5, 6, 7]);
        assert_eq!(squares.snapshot(), vec![25, 49]);
    }
}
