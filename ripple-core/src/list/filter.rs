//! Filtered lists.
//!
//! A [`FilterList`] shows the elements of its source that match a predicate.
//! It keeps one match flag per source element so it can translate source
//! indices into its own indices without re-running the predicate over the
//! whole source on every change.

use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use super::observable::ObservableList;
use crate::error::Result;
use crate::event::{ChangeEvent, ChangeKind, ListEventListener};
use crate::graph::NodeKind;

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

struct FilterState<T> {
    predicate: Predicate<T>,

    /// One flag per source element: whether it is visible in the output.
    flags: Vec<bool>,
}

/// Membership change of one source element after re-evaluation.
enum Verdict {
    Show,
    Hide,
    Refresh,
    Keep,
}

/// A live view of the source elements matching a predicate.
///
/// Dereferences to its output [`ObservableList`], so it can be subscribed
/// to, snapshotted and used as the source of further derived lists.
pub struct FilterList<T> {
    source: Arc<ObservableList<T>>,
    output: Arc<ObservableList<T>>,
    state: Mutex<FilterState<T>>,
}

impl<T> FilterList<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a filtered view of `source`.
    ///
    /// The view is populated silently and then listens to `source`.
    pub fn new<P>(source: &Arc<ObservableList<T>>, predicate: P) -> Result<Arc<Self>>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let publisher = source.publisher();
        let _guard = publisher.lock();

        let (flags, visible) = source.with_items(|items| {
            let flags: Vec<bool> = items.iter().map(&predicate).collect();
            let visible: Vec<T> = items
                .iter()
                .zip(&flags)
                .filter(|(_, shown)| **shown)
                .map(|(item, _)| item.clone())
                .collect();
            (flags, visible)
        });

        let filter = Arc::new(Self {
            source: Arc::clone(source),
            output: Arc::new(ObservableList::with_kind(publisher, NodeKind::Derived, visible)),
            state: Mutex::new(FilterState {
                predicate: Box::new(predicate),
                flags,
            }),
        });

        let strong: Arc<dyn ListEventListener> = filter.clone();
        publisher.attach_listener(filter.output.id(), Arc::downgrade(&strong))?;
        source.subscribe(filter.output.id())?;
        Ok(filter)
    }

    /// The list this view filters.
    pub fn source(&self) -> &Arc<ObservableList<T>> {
        &self.source
    }

    /// The filtered output list.
    pub fn list(&self) -> &Arc<ObservableList<T>> {
        &self.output
    }

    /// Replace the predicate and recompute membership.
    pub fn set_predicate<P>(&self, predicate: P)
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.output.publisher().batch(|| {
            let mut state = self.state.lock();
            state.predicate = Box::new(predicate);
            if !self.reconcile(&mut state, |_| true, false) {
                self.resync(&mut state);
            }
        });
    }

    /// Re-run the predicate over every source element.
    ///
    /// Call this when the predicate depends on state that changed. All
    /// resulting changes are published as one event; if nothing changed,
    /// nothing is published.
    pub fn refilter(&self) {
        self.output.publisher().batch(|| {
            let mut state = self.state.lock();
            if !self.reconcile(&mut state, |_| true, false) {
                self.resync(&mut state);
            }
        });
    }

    /// Re-evaluate the source elements selected by `dirty` and apply the
    /// difference to the output, front to back.
    ///
    /// `flags` must already be aligned with the settled source. Returns
    /// `false` if the output turned out to be out of step, in which case it
    /// must be rebuilt with [`resync`](Self::resync).
    fn reconcile(
        &self,
        state: &mut FilterState<T>,
        dirty: impl Fn(usize) -> bool,
        refresh: bool,
    ) -> bool {
        let items = self.source.snapshot();
        let FilterState {
            ref predicate,
            ref mut flags,
        } = *state;
        let mut out = 0;

        for (index, item) in items.iter().enumerate() {
            let Some(shown) = flags.get(index).copied() else {
                warn!(index, "filter flags out of step with source");
                return false;
            };
            let verdict = if dirty(index) {
                match (shown, predicate(item)) {
                    (false, true) => Verdict::Show,
                    (true, false) => Verdict::Hide,
                    (true, true) if refresh => Verdict::Refresh,
                    _ => Verdict::Keep,
                }
            } else {
                Verdict::Keep
            };

            let applied = match verdict {
                Verdict::Show => {
                    flags[index] = true;
                    self.output.insert(out, item.clone())
                }
                Verdict::Hide => {
                    flags[index] = false;
                    self.output.remove(out).map(drop)
                }
                Verdict::Refresh => self.output.set(out, item.clone()).map(drop),
                Verdict::Keep => Ok(()),
            };
            if let Err(err) = applied {
                warn!(%err, index, "failed to apply filter change");
                return false;
            }

            if flags[index] {
                out += 1;
            }
        }
        flags.len() == items.len()
    }

    /// Recompute every flag and replace the output wholesale.
    fn resync(&self, state: &mut FilterState<T>) {
        let items = self.source.snapshot();
        let FilterState {
            ref predicate,
            ref mut flags,
        } = *state;
        *flags = items.iter().map(|item| predicate(item)).collect();
        let visible: Vec<T> = items
            .into_iter()
            .zip(flags.iter())
            .filter(|(_, shown)| **shown)
            .map(|(item, _)| item)
            .collect();

        warn!(visible = visible.len(), "rebuilding filtered list");
        self.output.clear();
        self.output.extend(visible);
    }
}

impl<T> ListEventListener for FilterList<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn list_changed(&self, event: ChangeEvent) {
        let mut state = self.state.lock();
        // Source elements to re-evaluate, aligned with `flags`.
        let mut dirty = vec![false; state.flags.len()];
        let mut in_step = true;

        for block in event {
            match block.kind() {
                ChangeKind::Insert => {
                    if block.start() > state.flags.len() {
                        in_step = false;
                        continue;
                    }
                    for index in block.range() {
                        state.flags.insert(index, false);
                        dirty.insert(index, true);
                    }
                }
                ChangeKind::Delete => {
                    for _ in block.range() {
                        let start = block.start();
                        if start >= state.flags.len() {
                            in_step = false;
                            break;
                        }
                        dirty.remove(start);
                        if state.flags.remove(start) {
                            let out = state.flags[..start].iter().filter(|shown| **shown).count();
                            if let Err(err) = self.output.remove(out) {
                                warn!(%err, start, "failed to remove filtered element");
                                in_step = false;
                            }
                        }
                    }
                }
                ChangeKind::Update => {
                    for index in block.range() {
                        if let Some(flag) = dirty.get_mut(index) {
                            *flag = true;
                        }
                    }
                }
            }
        }

        // The source has settled; its indices now match `flags`.
        if !in_step || !self.reconcile(&mut state, |index| dirty[index], true) {
            self.resync(&mut state);
        }
    }
}

impl<T> Deref for FilterList<T> {
    type Target = ObservableList<T>;

    fn deref(&self) -> &Self::Target {
        &self.output
    }
}

impl<T> std::fmt::Debug for FilterList<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterList")
            .field("source", &self.source.id())
            .field("output", &self.output)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ChangeBlock, FnListener};
    use crate::graph::Publisher;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn numbers(publisher: &Arc<Publisher>, items: Vec<i32>) -> Arc<ObservableList<i32>> {
        Arc::new(ObservableList::from_vec(publisher, items))
    }

    #[test]
    fn filter_starts_with_matching_elements() {
        let publisher = Publisher::new();
        let source = numbers(&publisher, vec![1, 12, 3, 14]);
        let filter = FilterList::new(&source, |x| *x > 10).unwrap();
        assert_eq!(filter.snapshot(), vec![12, 14]);
    }

    #[test]
    fn filter_follows_source_mutations() {
        let publisher = Publisher::new();
        let source = numbers(&publisher, vec![0, 7, 9]);
        let filter = FilterList::new(&source, |x| *x > 10).unwrap();
        assert!(filter.is_empty());

        source.push(11);
        assert_eq!(filter.snapshot(), vec![11]);

        source.push(13);
        source.insert(0, 20).unwrap();
        assert_eq!(filter.snapshot(), vec![20, 11, 13]);

        source.set(4, 1).unwrap();
        assert_eq!(filter.snapshot(), vec![20, 13]);

        source.set(1, 50).unwrap();
        assert_eq!(filter.snapshot(), vec![20, 50, 13]);

        source.remove(0).unwrap();
        assert_eq!(filter.snapshot(), vec![50, 13]);

        source.clear();
        assert!(filter.is_empty());
    }

    #[test]
    fn batched_source_changes_are_reconciled_in_one_event() {
        let publisher = Publisher::new();
        let source = numbers(&publisher, vec![1, 20, 3, 40]);
        let filter = FilterList::new(&source, |x| *x > 10).unwrap();

        let events = Arc::new(AtomicI32::new(0));
        let events_clone = events.clone();
        let handle = publisher.add_listener(Arc::new(FnListener::new(move |_| {
            events_clone.fetch_add(1, Ordering::SeqCst);
        })));
        filter.subscribe(handle.id()).unwrap();

        source.batch(|source| {
            source.remove(1).unwrap();
            source.insert(0, 99).unwrap();
            source.set(3, 5).unwrap();
            source.push(77);
        });

        assert_eq!(source.snapshot(), vec![99, 1, 3, 5, 77]);
        assert_eq!(filter.snapshot(), vec![99, 77]);
        assert_eq!(events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn published_blocks_replay_onto_previous_contents() {
        let publisher = Publisher::new();
        let source = numbers(&publisher, vec![11, 1, 12, 2, 13]);
        let filter = FilterList::new(&source, |x| *x > 10).unwrap();

        let before = filter.snapshot();
        let blocks = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let blocks_clone = blocks.clone();
        let handle = publisher.add_listener(Arc::new(FnListener::new(move |event: ChangeEvent| {
            blocks_clone.lock().extend(event);
        })));
        filter.subscribe(handle.id()).unwrap();

        source.batch(|source| {
            source.remove(0).unwrap();
            source.push(14);
            source.set(1, 3).unwrap();
        });

        // Replaying the blocks onto the old contents yields the new length.
        let mut len = before.len();
        for block in blocks.lock().iter() {
            match block.kind() {
                ChangeKind::Insert => len += block.len(),
                ChangeKind::Delete => len -= block.len(),
                ChangeKind::Update => {}
            }
        }
        assert_eq!(len, filter.len());
        assert_eq!(filter.snapshot(), vec![13, 14]);
        // Hiding 12 right after deleting 11 coalesces into one delete.
        assert_eq!(
            blocks.lock().as_slice(),
            &[ChangeBlock::delete(0, 2), ChangeBlock::insert(1, 2)]
        );
    }

    #[test]
    fn refilter_without_change_publishes_nothing() {
        let publisher = Publisher::new();
        let source = numbers(&publisher, vec![1, 2, 3]);
        let filter = FilterList::new(&source, |_| true).unwrap();

        filter.refilter();
        assert_eq!(publisher.stats().transactions, 0);

        filter.set_predicate(|x| x % 2 == 1);
        assert_eq!(filter.snapshot(), vec![1, 3]);
        assert_eq!(publisher.stats().transactions, 1);
    }

    #[test]
    fn output_out_of_step_is_rebuilt() {
        let publisher = Publisher::new();
        let source = numbers(&publisher, vec![1, 12, 3, 14]);
        let filter = FilterList::new(&source, |x| *x > 10).unwrap();

        // Writing to the output directly breaks its link to the flags.
        filter.list().clear();
        source.remove(1).unwrap();
        assert_eq!(filter.snapshot(), vec![14]);

        source.push(20);
        source.set(0, 30).unwrap();
        assert_eq!(filter.snapshot(), vec![30, 14, 20]);
    }

    #[test]
    fn debug_shows_source_and_output() {
        let publisher = Publisher::new();
        let source = numbers(&publisher, vec![1, 12]);
        let filter = FilterList::new(&source, |x| *x > 10).unwrap();

        let rendered = format!("{filter:?}");
        assert!(rendered.starts_with("FilterList"));
        assert!(rendered.contains(&format!("{:?}", source.id())));
        assert!(rendered.contains("[12]"));
    }

    #[test]
    fn filters_chain() {
        let publisher = Publisher::new();
        let source = numbers(&publisher, (0..10).collect());
        let evens = FilterList::new(&source, |x| x % 2 == 0).unwrap();
        let small_evens = FilterList::new(evens.list(), |x| *x < 5).unwrap();
        assert_eq!(small_evens.snapshot(), vec![0, 2, 4]);

        source.insert(0, -2).unwrap();
        assert_eq!(small_evens.snapshot(), vec![-2, 0, 2, 4]);

        evens.set_predicate(|x| x % 2 != 0);
        assert_eq!(small_evens.snapshot(), vec![1, 3]);
    }
}
