//! Key-ordered partition merge
//!
//! Walks several key-ordered partition streams at once and yields, for each
//! key present in any of them, every stream's fragment for that key.

use std::iter::Peekable;

use crate::error::Result;
use crate::fragment::FragmentSource;
use crate::key::DecoratedKey;

/// One partition key with the fragments every input holds for it
pub type PartitionFragments = (DecoratedKey, Vec<Box<dyn FragmentSource>>);

/// Merges partition streams sorted by `DecoratedKey`
///
/// Fragments are handed out in input order. An error from any input ends the
/// merge.
pub struct PartitionMerger<I: Iterator> {
    inputs: Vec<Peekable<I>>,
    failed: bool,
}

impl<I, F> PartitionMerger<I>
where
    I: Iterator<Item = Result<(DecoratedKey, F)>>,
    F: FragmentSource + 'static,
{
    pub fn new(inputs: impl IntoIterator<Item = I>) -> Self {
        Self {
            inputs: inputs.into_iter().map(Iterator::peekable).collect(),
            failed: false,
        }
    }
}

impl<I, F> Iterator for PartitionMerger<I>
where
    I: Iterator<Item = Result<(DecoratedKey, F)>>,
    F: FragmentSource + 'static,
{
    type Item = Result<PartitionFragments>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        // Surface the first read error before choosing a key
        for input in &mut self.inputs {
            if matches!(input.peek(), Some(Err(_))) {
                self.failed = true;
                if let Some(Err(e)) = input.next() {
                    return Some(Err(e));
                }
            }
        }

        let smallest = self
            .inputs
            .iter_mut()
            .filter_map(|input| match input.peek() {
                Some(Ok((key, _))) => Some(key.clone()),
                _ => None,
            })
            .min()?;

        let mut fragments: Vec<Box<dyn FragmentSource>> = Vec::new();
        for input in &mut self.inputs {
            if matches!(input.peek(), Some(Ok((key, _))) if *key == smallest) {
                if let Some(Ok((_, fragment))) = input.next() {
                    fragments.push(Box::new(fragment));
                }
            }
        }

        Some(Ok((smallest, fragments)))
    }
}
