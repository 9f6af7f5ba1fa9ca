//! Strong-reference slots that keep values alive independently of the
//! script-visible object graph.

use crate::runner::ds::error::RuntimeError;
use crate::runner::ds::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefHandle(u32);

#[derive(Debug, Default)]
pub struct RefRegistry {
    slots: Vec<Option<Value>>,
    free: Vec<u32>,
    live: usize,
}

impl RefRegistry {
    pub fn new() -> Self {
        RefRegistry::default()
    }

    pub fn reference(&mut self, value: Value) -> RefHandle {
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(value);
                RefHandle(index)
            }
            None => {
                self.slots.push(Some(value));
                RefHandle((self.slots.len() - 1) as u32)
            }
        }
    }

    pub fn get(&self, handle: RefHandle) -> Option<&Value> {
        self.slots.get(handle.0 as usize).and_then(|s| s.as_ref())
    }

    pub fn unreference(&mut self, handle: RefHandle) -> Result<Value, RuntimeError> {
        let slot = self
            .slots
            .get_mut(handle.0 as usize)
            .and_then(|s| s.take())
            .ok_or_else(|| {
                RuntimeError::InternalConsistency(format!(
                    "reference handle {} is not live",
                    handle.0
                ))
            })?;
        self.free.push(handle.0);
        self.live -= 1;
        Ok(slot)
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Drop every live reference, returning how many were released.
    pub fn clear(&mut self) -> usize {
        let released = self.live;
        self.slots.clear();
        self.free.clear();
        self.live = 0;
        released
    }
}
