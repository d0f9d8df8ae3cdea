use crate::{
    config::DropPolicy,
    types::{StreamMessage, WithSequence},
};
use std::collections::VecDeque;

/// A buffer to store the pending messages of one stream in arrival
/// order.
///
/// Messages are never reordered. They leave the buffer either moved
/// into a bundle or discarded by one of the pruning methods.
#[derive(Debug)]
pub struct Buffer<K, T>
where
    T: WithSequence,
{
    buffer: VecDeque<StreamMessage<K, T>>,
    capacity: Option<usize>,
    drop_policy: DropPolicy,
}

impl<K, T> Buffer<K, T>
where
    T: WithSequence,
{
    /// A buffer that grows until it is drained.
    pub fn unbounded() -> Self {
        Self {
            buffer: VecDeque::new(),
            capacity: None,
            drop_policy: DropPolicy::default(),
        }
    }

    /// A buffer that holds at most `capacity` messages and applies
    /// `drop_policy` once it is full.
    pub fn with_capacity(capacity: usize, drop_policy: DropPolicy) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity: Some(capacity),
            drop_policy,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Checks if the buffer can take another message without evicting
    /// or rejecting.
    pub fn has_room(&self) -> bool {
        self.capacity.is_none_or(|cap| self.buffer.len() < cap)
    }

    pub fn front(&self) -> Option<&StreamMessage<K, T>> {
        self.buffer.front()
    }

    pub fn back(&self) -> Option<&StreamMessage<K, T>> {
        self.buffer.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamMessage<K, T>> {
        self.buffer.iter()
    }

    /// Append a message.
    ///
    /// On a full buffer, [DropPolicy::DropOldest] evicts the front
    /// message and returns it as `Ok(Some(_))`, while
    /// [DropPolicy::RejectNew] hands the new message back as `Err`.
    pub fn push(
        &mut self,
        item: StreamMessage<K, T>,
    ) -> Result<Option<StreamMessage<K, T>>, StreamMessage<K, T>> {
        let evicted = match self.capacity {
            Some(cap) if self.buffer.len() >= cap => match self.drop_policy {
                DropPolicy::DropOldest => self.buffer.pop_front(),
                DropPolicy::RejectNew => return Err(item),
            },
            _ => None,
        };

        self.buffer.push_back(item);
        Ok(evicted)
    }

    /// Move the newest message out and discard everything older.
    ///
    /// Returns the message together with the number of discarded
    /// messages.
    pub fn take_latest(&mut self) -> Option<(StreamMessage<K, T>, usize)> {
        let latest = self.buffer.pop_back()?;
        let dropped = self.buffer.len();
        self.buffer.clear();
        Some((latest, dropped))
    }

    pub fn contains_sequence(&self, seq: &T::Seq) -> bool {
        self.buffer.iter().any(|msg| msg.sequence() == seq)
    }

    /// Move out the most recently arrived message carrying `seq`.
    pub fn take_sequence(&mut self, seq: &T::Seq) -> Option<StreamMessage<K, T>> {
        let index = self.buffer.iter().rposition(|msg| msg.sequence() == seq)?;
        self.buffer.remove(index)
    }

    /// Drops messages whose sequence key is at or below `seq` and
    /// returns the number of dropped messages. The relative order of
    /// the survivors is kept.
    pub fn drop_through(&mut self, seq: &T::Seq) -> usize {
        let before = self.buffer.len();
        self.buffer.retain(|msg| msg.sequence() > seq);
        before - self.buffer.len()
    }
}
