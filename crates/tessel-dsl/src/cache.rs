//! Specialization caches
//!
//! Build artifacts are memoized for the process lifetime with no
//! eviction. Kernel tasks key on `(function, relation-or-subset,
//! backend)`; helper tasks key on `(function, argument types, caller
//! domain)` so one helper used from two domains gets two specializations.

use indexmap::IndexMap;

use tessel_ir::{Backend, FunctionId, RelationId, SubsetId, TaskId, TaskSpec, Type};

/// The relation-or-subset half of a kernel cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DomainKey {
    Relation(RelationId),
    Subset(SubsetId),
}

/// Process-wide cache of emitted tasks.
#[derive(Debug, Default)]
pub struct SpecializationCache {
    kernels: IndexMap<(FunctionId, DomainKey, Backend), TaskId>,
    helpers: IndexMap<(FunctionId, Vec<Type>, RelationId), TaskId>,
    tasks: IndexMap<TaskId, TaskSpec>,
    next_task: u64,
}

impl SpecializationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kernel_hit(
        &self,
        function: &FunctionId,
        domain: &DomainKey,
        backend: Backend,
    ) -> Option<&TaskId> {
        self.kernels
            .get(&(function.clone(), domain.clone(), backend))
    }

    pub fn helper_hit(
        &self,
        function: &FunctionId,
        arg_types: &[Type],
        caller: &RelationId,
    ) -> Option<&TaskId> {
        self.helpers
            .get(&(function.clone(), arg_types.to_vec(), caller.clone()))
    }

    /// Mint a fresh task id.
    pub fn next_id(&mut self, name: &str) -> TaskId {
        let id = TaskId(format!("task{}:{}", self.next_task, name));
        self.next_task += 1;
        id
    }

    pub fn insert_kernel(
        &mut self,
        function: FunctionId,
        domain: DomainKey,
        backend: Backend,
        spec: TaskSpec,
    ) -> TaskId {
        let id = spec.id.clone();
        self.kernels.insert((function, domain, backend), id.clone());
        self.tasks.insert(id.clone(), spec);
        id
    }

    pub fn insert_helper(
        &mut self,
        function: FunctionId,
        arg_types: Vec<Type>,
        caller: RelationId,
        spec: TaskSpec,
    ) -> TaskId {
        let id = spec.id.clone();
        self.helpers
            .insert((function, arg_types, caller), id.clone());
        self.tasks.insert(id.clone(), spec);
        id
    }

    pub fn task(&self, id: &TaskId) -> Option<&TaskSpec> {
        self.tasks.get(id)
    }

    /// All emitted tasks, in emission order.
    pub fn into_tasks(self) -> IndexMap<TaskId, TaskSpec> {
        self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
