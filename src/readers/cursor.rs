//! Two-level cursor used by every chained stage.
//!
//! The outer cursor walks the upstream stage's records; for each one an
//! inner cursor is opened. When the inner cursor runs dry the outer cursor
//! advances and a new inner cursor is built, in a loop rather than by
//! recursion, so any number of empty inner sequences in a row costs no
//! stack. The stage ends only when the outer cursor ends.

use super::Driver;
use crate::errors::Result;
use crate::row::Value;

/// Anything that yields upstream records for a chained stage.
pub(crate) trait DriverSource {
    fn next_driver(&mut self) -> Result<Option<Driver>>;
}

struct Inner<C> {
    cursor: C,
    lineage: Vec<Value>,
}

/// Outer cursor over upstream records plus the inner cursor of the current one.
pub(crate) struct Nested<U, C> {
    upstream: Option<U>,
    inner: Option<Inner<C>>,
}

impl<U: DriverSource, C> Nested<U, C> {
    /// Driven element by element by an upstream stage.
    pub fn chained(upstream: U) -> Self {
        Self {
            upstream: Some(upstream),
            inner: None,
        }
    }

    /// No upstream: a single inner cursor with no appended columns.
    pub fn root(cursor: C) -> Self {
        Self {
            upstream: None,
            inner: Some(Inner {
                cursor,
                lineage: Vec::new(),
            }),
        }
    }

    pub fn upstream(&self) -> Option<&U> {
        self.upstream.as_ref()
    }

    /// Next inner item with the upstream columns it must carry.
    ///
    /// `open` builds the inner cursor for one upstream record; `step`
    /// advances it, `Ok(None)` meaning that inner sequence is exhausted.
    pub fn next<T>(
        &mut self,
        mut open: impl FnMut(&Driver) -> Result<C>,
        mut step: impl FnMut(&mut C) -> Result<Option<T>>,
    ) -> Result<Option<(T, Vec<Value>)>> {
        loop {
            match self.inner.as_mut() {
                Some(inner) => match step(&mut inner.cursor)? {
                    Some(item) => return Ok(Some((item, inner.lineage.clone()))),
                    None => self.inner = None,
                },
                None => {
                    let Some(upstream) = self.upstream.as_mut() else {
                        return Ok(None);
                    };
                    let Some(driver) = upstream.next_driver()? else {
                        return Ok(None);
                    };
                    let cursor = open(&driver)?;
                    self.inner = Some(Inner {
                        cursor,
                        lineage: driver.lineage,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    struct Outer(VecDeque<Driver>);

    impl DriverSource for Outer {
        fn next_driver(&mut self) -> Result<Option<Driver>> {
            Ok(self.0.pop_front())
        }
    }

    fn outer(counts: &[usize]) -> Outer {
        Outer(
            counts
                .iter()
                .enumerate()
                .map(|(i, m)| Driver {
                    lineage: vec![Value::UInt(i as u64), Value::UInt(*m as u64)],
                    anchor: None,
                })
                .collect(),
        )
    }

    /// Drain a nested cursor whose inner sequence for outer element `i` counts to `m_i`.
    fn drain(counts: &[usize]) -> Vec<(usize, Vec<Value>)> {
        let mut nested: Nested<Outer, std::ops::Range<usize>> = Nested::chained(outer(counts));
        let mut out = Vec::new();
        while let Some(item) = nested
            .next(
                |driver| match driver.lineage[1] {
                    Value::UInt(m) => Ok(0..m as usize),
                    _ => unreachable!(),
                },
                |range| Ok(range.next()),
            )
            .unwrap()
        {
            out.push(item);
        }
        out
    }

    #[test]
    fn test_empty_inner_sequences_are_skipped() {
        let rows = drain(&[0, 2, 0, 0, 1, 0]);
        let owners: Vec<Value> = rows.iter().map(|(_, lineage)| lineage[0].clone()).collect();
        assert_eq!(owners, vec![Value::UInt(1), Value::UInt(1), Value::UInt(4)]);
    }

    #[test]
    fn test_long_run_of_empty_inners_does_not_recurse() {
        let mut counts = vec![0; 200_000];
        counts.push(1);
        assert_eq!(drain(&counts).len(), 1);
    }

    #[test]
    fn test_root_cursor_has_no_lineage_and_ends() {
        let mut nested: Nested<Outer, std::ops::Range<usize>> = Nested::root(0..3);
        let mut seen = Vec::new();
        while let Some((item, lineage)) = nested
            .next(|_| unreachable!(), |range| Ok(range.next()))
            .unwrap()
        {
            assert!(lineage.is_empty());
            seen.push(item);
        }
        assert_eq!(seen, vec![0, 1, 2]);
        assert!(nested.next(|_| unreachable!(), |r| Ok(r.next())).unwrap().is_none());
    }

    #[test]
    fn test_inner_errors_propagate() {
        let mut nested: Nested<Outer, ()> = Nested::chained(outer(&[1]));
        let err = nested
            .next(
                |_| Ok(()),
                |_| -> Result<Option<()>> {
                    Err(crate::errors::EngineError::RowRead {
                        reason: "boom".into(),
                    })
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    proptest! {
        #[test]
        fn prop_emits_exactly_sum_of_inner_counts(counts in prop::collection::vec(0usize..5, 0..30)) {
            let rows = drain(&counts);
            prop_assert_eq!(rows.len(), counts.iter().sum::<usize>());

            // every row carries the lineage of the outer element that produced it, in order
            let expected: Vec<(usize, Vec<Value>)> = counts
                .iter()
                .enumerate()
                .flat_map(|(i, m)| {
                    (0..*m).map(move |j| (j, vec![Value::UInt(i as u64), Value::UInt(*m as u64)]))
                })
                .collect();
            prop_assert_eq!(rows, expected);
        }
    }
}
