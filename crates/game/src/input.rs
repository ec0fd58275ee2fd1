use std::collections::VecDeque;

use bitflags::bitflags;

use crate::config::INPUT_HISTORY_LENGTH;
use crate::net::wire::{Decode, Encode, WireError};

bitflags! {
    /// An entity's logical input state.
    ///
    /// The bit order is part of the wire format and must not change.
    /// Opposing bits may both be set; the movement table cancels them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InputFlags: u8 {
        const NORTH = 1 << 0;
        const SOUTH = 1 << 1;
        const EAST = 1 << 2;
        const WEST = 1 << 3;
    }
}

/// Input component, replicated as a single byte of flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Input {
    pub flags: InputFlags,
}

impl Input {
    pub fn new(flags: InputFlags) -> Self {
        Self { flags }
    }

    pub fn none(&self) -> bool {
        self.flags.is_empty()
    }
}

impl Encode for Input {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.flags.bits().encode(buf);
    }
}

impl Decode for Input {
    fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        let bits = u8::decode(r)?;
        InputFlags::from_bits(bits)
            .map(Input::new)
            .ok_or(WireError::InvalidValue("input flags"))
    }
}

/// Ring buffer of the player's past inputs, newest first. Index 0 is the
/// input for the current tick; index N is the input from N ticks ago.
///
/// Client only. The capacity bounds how far back reconciliation can replay.
#[derive(Debug, Clone)]
pub struct InputHistory {
    buffer: VecDeque<InputFlags>,
    capacity: usize,
}

impl Default for InputHistory {
    fn default() -> Self {
        Self::new(INPUT_HISTORY_LENGTH)
    }
}

impl InputHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Pushes the input for a new tick, evicting the oldest if full.
    pub fn push(&mut self, input: InputFlags) {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_back();
        }
        self.buffer.push_front(input);
    }

    /// The input from `ticks_back` ticks ago, if still remembered.
    pub fn get(&self, ticks_back: usize) -> Option<InputFlags> {
        self.buffer.get(ticks_back).copied()
    }

    /// Overwrites the remembered input `ticks_back` ticks ago. Used when
    /// the server reports it dropped an input.
    pub fn set(&mut self, ticks_back: usize, input: InputFlags) -> bool {
        match self.buffer.get_mut(ticks_back) {
            Some(slot) => {
                *slot = input;
                true
            }
            None => false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_newest_first() {
        let mut history = InputHistory::new(4);
        history.push(InputFlags::NORTH);
        history.push(InputFlags::EAST);

        assert_eq!(history.get(0), Some(InputFlags::EAST));
        assert_eq!(history.get(1), Some(InputFlags::NORTH));
        assert_eq!(history.get(2), None);
    }

    #[test]
    fn history_evicts_oldest() {
        let mut history = InputHistory::new(2);
        history.push(InputFlags::NORTH);
        history.push(InputFlags::SOUTH);
        history.push(InputFlags::EAST);

        assert_eq!(history.len(), 2);
        assert_eq!(history.get(1), Some(InputFlags::SOUTH));
    }

    #[test]
    fn input_rejects_unknown_bits() {
        let mut slice = &[0xF0u8][..];
        assert!(Input::decode(&mut slice).is_err());
    }
}
