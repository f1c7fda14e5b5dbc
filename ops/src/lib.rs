pub mod builtin;
pub mod element;
pub mod map;
pub mod op;
pub mod special;
pub mod types;

mod cache;
mod env;
mod matcher;

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

pub use env::{OpEnv, OpEnvBuilder};
pub use matcher::{BoundOp, Lifecycle, OpRequest};
pub use op::{Op, OpFactory};
pub use special::{Computer, Function, Hybrid, Inplace, Special};
pub use types::{
    AnyElement, Binding, Convention, DtypeConstraint, DtypeVisitor, InplaceTarget, OpError, OpSignature,
    Priority, RegistrationInfo, RejectReason, Rejection, ScalarAny, TensorAny, visit_dtype,
};

#[doc(hidden)]
pub use inventory;

/// Builds a fresh, uninitialized instance of one candidate.
pub type OpConstructor = Arc<dyn Fn() -> Box<dyn Op> + Send + Sync>;

/// One registered candidate. Immutable once registered.
pub struct OpDescriptor {
    identity:  String,
    signature: OpSignature,
    priority:  Priority,
    aliases:   Vec<String>,
    seq:       u64,
    factory:   OpConstructor,
}

impl OpDescriptor {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Candidate name, from the signature
    pub fn name(&self) -> &str {
        &self.signature.name
    }

    pub fn signature(&self) -> &OpSignature {
        &self.signature
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Registration sequence number; breaks priority ties.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn instantiate(&self) -> Box<dyn Op> {
        (self.factory)()
    }
}

impl fmt::Debug for OpDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpDescriptor")
            .field("identity", &self.identity)
            .field("name", &self.signature.name)
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .finish()
    }
}

/// Candidates of one identity, ordered by priority descending and then by
/// registration order.
#[derive(Debug, Default)]
pub struct CandidateSet {
    candidates: Vec<Arc<OpDescriptor>>,
}

impl CandidateSet {
    pub fn iter(&self) -> impl Iterator<Item = &Arc<OpDescriptor>> {
        self.candidates.iter()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    fn insert(&mut self, descriptor: OpDescriptor) {
        self.candidates.push(Arc::new(descriptor));
        self.candidates.sort_by_key(|d| (Reverse(d.priority), d.seq));
    }
}

/// Holds all registered ops, grouped by identity.
#[derive(Default)]
pub struct OpRegistry {
    sets:     HashMap<String, CandidateSet>,
    aliases:  HashMap<String, String>,
    next_seq: u64,
    sealed:   bool,
}

impl OpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every op submitted with `register_op!`.
    ///
    /// Link order is unspecified, so entries are registered sorted by
    /// identity and candidate name.
    pub fn collect_inventory(&mut self) -> Result<usize, OpError> {
        let mut entries: Vec<(&OpFactory, String)> = inventory::iter::<OpFactory>
            .into_iter()
            .map(|factory| (factory, (factory.factory)().signature().name.clone()))
            .collect();
        entries.sort_by(|a, b| (a.0.identity, &a.1).cmp(&(b.0.identity, &b.1)));

        for (factory, _) in &entries {
            let make = factory.factory;
            self.register_with_aliases(factory.identity, factory.priority, factory.aliases, move || make())?;
        }
        info!(ops = entries.len(), identities = self.sets.len(), "collected registered ops");
        Ok(entries.len())
    }

    /// Register a new candidate under `identity`
    pub fn register<F>(&mut self, identity: &str, priority: Priority, factory: F) -> Result<(), OpError>
    where
        F: Fn() -> Box<dyn Op> + Send + Sync + 'static,
    {
        self.register_with_aliases(identity, priority, &[], factory)
    }

    pub fn register_with_aliases<F>(
        &mut self,
        identity: &str,
        priority: Priority,
        aliases:  &[&str],
        factory:  F,
    ) -> Result<(), OpError>
    where
        F: Fn() -> Box<dyn Op> + Send + Sync + 'static,
    {
        if self.sealed {
            return Err(OpError::IllegalState(format!("registry is sealed; cannot register `{identity}`")));
        }
        if let Some(owner) = self.aliases.get(identity) {
            return Err(OpError::IllegalState(format!("`{identity}` is already an alias of `{owner}`")));
        }
        for alias in aliases {
            let taken = match self.aliases.get(*alias) {
                Some(owner) => owner != identity,
                None => self.sets.contains_key(*alias) || *alias == identity,
            };
            if taken {
                return Err(OpError::IllegalState(format!("alias `{alias}` of `{identity}` is already in use")));
            }
        }

        let signature = factory().signature().clone();
        if let Some(set) = self.sets.get(identity) {
            if set.iter().any(|d| d.name() == signature.name) {
                return Err(OpError::IllegalState(format!(
                    "candidate `{}` is already registered under `{identity}`",
                    signature.name
                )));
            }
        }

        for alias in aliases {
            self.aliases.insert((*alias).to_string(), identity.to_string());
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        debug!(identity, candidate = %signature.name, %priority, seq, "registered candidate");
        self.sets.entry(identity.to_string()).or_default().insert(OpDescriptor {
            identity: identity.to_string(),
            signature,
            priority,
            aliases: aliases.iter().map(|a| (*a).to_string()).collect(),
            seq,
            factory: Arc::new(factory),
        });
        Ok(())
    }

    /// Refuse further registration.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Canonical identity for a name or alias.
    pub fn canonical<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        if self.sets.contains_key(name) {
            return Some(name);
        }
        self.aliases.get(name).map(String::as_str)
    }

    /// Lookup by identity or alias
    pub fn candidates(&self, name: &str) -> Option<&CandidateSet> {
        self.canonical(name).and_then(|identity| self.sets.get(identity))
    }

    /// Registered identities, sorted
    pub fn identities(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.sets.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered candidates across all identities
    pub fn len(&self) -> usize {
        self.sets.values().map(CandidateSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

impl fmt::Debug for OpRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpRegistry")
            .field("identities", &self.identities())
            .field("candidates", &self.len())
            .field("sealed", &self.sealed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DtypeConstraint;

    #[derive(Clone)]
    struct Named(OpSignature);

    impl Named {
        fn new(name: &str) -> Self {
            Named(OpSignature {
                name:       name.to_string(),
                inputs:     vec![DtypeConstraint::Any],
                params:     vec![],
                output:     DtypeConstraint::Any,
                same_dtype: false,
                compute:    true,
                mutate:     vec![],
            })
        }
    }

    impl Op for Named {
        fn signature(&self) -> &OpSignature {
            &self.0
        }

        fn independent_instance(&self) -> Box<dyn Op> {
            Box::new(self.clone())
        }
    }

    fn named(name: &'static str) -> impl Fn() -> Box<dyn Op> + Send + Sync + 'static {
        move || Box::new(Named::new(name))
    }

    #[test]
    fn candidates_sorted_by_priority_then_registration() {
        let mut reg = OpRegistry::new();
        reg.register("test.op", Priority::NORMAL, named("a")).unwrap();
        reg.register("test.op", Priority::HIGH, named("b")).unwrap();
        reg.register("test.op", Priority::NORMAL, named("c")).unwrap();
        reg.register("test.op", Priority::LAST, named("d")).unwrap();

        let names: Vec<&str> = reg.candidates("test.op").unwrap().iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["b", "a", "c", "d"]);
        assert_eq!(reg.len(), 4);
    }

    #[test]
    fn aliases_resolve_to_the_identity() {
        let mut reg = OpRegistry::new();
        reg.register_with_aliases("math.add", Priority::NORMAL, &["add", "plus"], named("a")).unwrap();
        assert_eq!(reg.canonical("plus"), Some("math.add"));
        assert_eq!(reg.candidates("add").map(CandidateSet::len), Some(1));
        assert!(reg.candidates("minus").is_none());
        assert_eq!(reg.identities(), vec!["math.add"]);
    }

    #[test]
    fn alias_collision_is_illegal() {
        let mut reg = OpRegistry::new();
        reg.register_with_aliases("math.add", Priority::NORMAL, &["add"], named("a")).unwrap();
        reg.register("math.sub", Priority::NORMAL, named("s")).unwrap();

        let err = reg.register_with_aliases("math.plus", Priority::NORMAL, &["add"], named("p")).unwrap_err();
        assert!(matches!(err, OpError::IllegalState(_)));
        let err = reg.register_with_aliases("math.plus", Priority::NORMAL, &["math.sub"], named("p")).unwrap_err();
        assert!(matches!(err, OpError::IllegalState(_)));
        let err = reg.register("add", Priority::NORMAL, named("x")).unwrap_err();
        assert!(matches!(err, OpError::IllegalState(_)));
        // re-declaring an identity's own alias is fine
        reg.register_with_aliases("math.add", Priority::LOW, &["add"], named("b")).unwrap();
    }

    #[test]
    fn duplicate_candidate_is_illegal() {
        let mut reg = OpRegistry::new();
        reg.register("test.op", Priority::NORMAL, named("a")).unwrap();
        let err = reg.register("test.op", Priority::HIGH, named("a")).unwrap_err();
        assert!(matches!(err, OpError::IllegalState(_)));
    }

    #[test]
    fn sealed_registry_refuses_registration() {
        let mut reg = OpRegistry::new();
        reg.seal();
        assert!(reg.is_sealed());
        let err = reg.register("test.op", Priority::NORMAL, named("a")).unwrap_err();
        assert!(matches!(err, OpError::IllegalState(_)));
    }

    #[test]
    fn inventory_contains_builtins() {
        let mut reg = OpRegistry::new();
        let n = reg.collect_inventory().unwrap();
        assert_eq!(n, reg.len());
        for identity in ["math.add", "math.subtract", "math.multiply", "math.divide", "create.tensor"] {
            assert!(reg.candidates(identity).is_some(), "{identity} missing");
        }
        let add = reg.candidates("math.add").unwrap();
        assert!(add.iter().any(|d| d.name() == "array-add-i8"));
        assert_eq!(reg.canonical("create.img"), Some("create.tensor"));
    }
}
