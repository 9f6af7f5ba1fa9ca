//! Capability levels stamped onto prototypes.

use std::rc::Rc;

use crate::runner::vm::bytecode::Prototype;

/// Bitmask of permissions carried by compiled code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capability(pub u64);

impl Capability {
    pub const NONE: Capability = Capability(0);
    pub const MAX: Capability = Capability(u64::MAX);
}

/// Assigns a capability to a prototype tree.
pub trait CapabilityAssigner {
    fn assign(&self, proto: &Rc<Prototype>, capability: Capability);
}

/// Stamps the capability on the prototype and every nested prototype.
#[derive(Debug, Default)]
pub struct ProtoCapabilityAssigner;

impl CapabilityAssigner for ProtoCapabilityAssigner {
    fn assign(&self, proto: &Rc<Prototype>, capability: Capability) {
        proto.capability.set(capability);
        for child in &proto.protos {
            self.assign(child, capability);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::vm::compiler::{ScriptCompiler, SnippetCompiler};

    #[test]
    fn test_assign_reaches_nested_prototypes() {
        let proto = SnippetCompiler
            .compile("local f = function() return function() end end", "=test")
            .unwrap();
        assert_eq!(proto.capability.get(), Capability::NONE);

        ProtoCapabilityAssigner.assign(&proto, Capability::MAX);
        let child = &proto.protos[0];
        let grandchild = &child.protos[0];
        assert_eq!(proto.capability.get(), Capability::MAX);
        assert_eq!(child.capability.get(), Capability::MAX);
        assert_eq!(grandchild.capability.get(), Capability::MAX);
    }
}
