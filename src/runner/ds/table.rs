//! String-keyed tables used for global namespaces and environments.
//!
//! A table may forward to a *proxy* table. Reads of absent keys always fall
//! through to the proxy; writes of absent keys fall through only when the
//! table was created with write forwarding.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::runner::ds::error::RuntimeError;
use crate::runner::ds::value::Value;

pub type TableRef = Rc<RefCell<Table>>;

#[derive(Debug, Default)]
pub struct Table {
    hash: HashMap<String, Value>,
    array: Vec<Value>,
    proxy: Option<TableRef>,
    forward_writes: bool,
    readonly: bool,
}

impl Table {
    pub fn new() -> Self {
        Table::default()
    }

    pub fn new_ref() -> TableRef {
        Rc::new(RefCell::new(Table::new()))
    }

    /// Create a table whose absent keys resolve through `proxy`.
    pub fn with_proxy(proxy: TableRef, forward_writes: bool) -> TableRef {
        Rc::new(RefCell::new(Table {
            proxy: Some(proxy),
            forward_writes,
            ..Table::default()
        }))
    }

    pub fn get(&self, key: &str) -> Value {
        match self.hash.get(key) {
            Some(v) => v.clone(),
            None => match &self.proxy {
                Some(proxy) => proxy.borrow().get(key),
                None => Value::Nil,
            },
        }
    }

    pub fn raw_get(&self, key: &str) -> Value {
        self.hash.get(key).cloned().unwrap_or(Value::Nil)
    }

    pub fn set(&mut self, key: &str, value: Value) -> Result<(), RuntimeError> {
        if self.readonly {
            return Err(RuntimeError::Script(format!(
                "attempt to modify a readonly table (key '{}')",
                key
            )));
        }
        if !self.hash.contains_key(key) && self.forward_writes {
            if let Some(proxy) = &self.proxy {
                return proxy.borrow_mut().set(key, value);
            }
        }
        self.raw_set(key, value);
        Ok(())
    }

    /// Store without readonly checks or forwarding. Assigning `nil` removes the key.
    pub fn raw_set(&mut self, key: &str, value: Value) {
        if value.is_nil() {
            self.hash.remove(key);
        } else {
            self.hash.insert(key.to_string(), value);
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.hash.contains_key(key)
    }

    pub fn push(&mut self, value: Value) {
        self.array.push(value);
    }

    /// 1-based sequence access.
    pub fn get_index(&self, index: usize) -> Value {
        if index == 0 {
            return Value::Nil;
        }
        self.array.get(index - 1).cloned().unwrap_or(Value::Nil)
    }

    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty() && self.hash.is_empty()
    }

    pub fn set_readonly(&mut self, readonly: bool) {
        self.readonly = readonly;
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_fall_through_proxy() {
        let base = Table::new_ref();
        base.borrow_mut().raw_set("x", Value::Number(1.0));
        let t = Table::with_proxy(base.clone(), false);
        assert_eq!(t.borrow().get("x"), Value::Number(1.0));
        assert_eq!(t.borrow().raw_get("x"), Value::Nil);
    }

    #[test]
    fn test_writes_stay_local_without_forwarding() {
        let base = Table::new_ref();
        let t = Table::with_proxy(base.clone(), false);
        t.borrow_mut().set("y", Value::Boolean(true)).unwrap();
        assert!(t.borrow().contains_key("y"));
        assert!(!base.borrow().contains_key("y"));
    }

    #[test]
    fn test_writes_forward_when_enabled() {
        let base = Table::new_ref();
        let t = Table::with_proxy(base.clone(), true);
        t.borrow_mut().raw_set("own", Value::Number(1.0));
        t.borrow_mut().set("y", Value::Boolean(true)).unwrap();
        t.borrow_mut().set("own", Value::Number(2.0)).unwrap();
        assert!(base.borrow().contains_key("y"));
        assert_eq!(t.borrow().raw_get("own"), Value::Number(2.0));
    }

    #[test]
    fn test_readonly_rejects_writes() {
        let t = Table::new_ref();
        t.borrow_mut().set_readonly(true);
        assert!(t.borrow_mut().set("k", Value::Nil).is_err());
    }

    #[test]
    fn test_sequence_is_one_based() {
        let mut t = Table::new();
        t.push(Value::from("a"));
        assert_eq!(t.get_index(1), Value::from("a"));
        assert_eq!(t.get_index(0), Value::Nil);
        assert_eq!(t.len(), 1);
    }
}
