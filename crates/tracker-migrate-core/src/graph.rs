use std::collections::BTreeSet;
use std::fmt::Display;

use crate::{EntityType, MigrateError};

/// A declared reference from `entity.field` to the `id` of `references`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ForeignKey {
    pub entity: EntityType,
    pub field: &'static str,
    pub references: EntityType,
    /// Optional keys are satisfied when the field is absent.
    pub required: bool,
}

impl ForeignKey {
    const fn required(entity: EntityType, field: &'static str, references: EntityType) -> Self {
        Self { entity, field, references, required: true }
    }

    const fn optional(entity: EntityType, field: &'static str, references: EntityType) -> Self {
        Self { entity, field, references, required: false }
    }
}

/// Foreign keys of the tracker data model, grouped by owning entity in check order.
pub const FOREIGN_KEYS: [ForeignKey; 11] = [
    ForeignKey::required(EntityType::User, "organization_id", EntityType::Organization),
    ForeignKey::required(EntityType::Issue, "organization_id", EntityType::Organization),
    ForeignKey::optional(EntityType::Issue, "assignee_id", EntityType::User),
    ForeignKey::required(EntityType::Issue, "reporter_id", EntityType::User),
    ForeignKey::required(EntityType::Channel, "organization_id", EntityType::Organization),
    ForeignKey::required(EntityType::ChannelMembership, "channel_id", EntityType::Channel),
    ForeignKey::required(EntityType::ChannelMembership, "user_id", EntityType::User),
    ForeignKey::required(EntityType::Conversation, "channel_id", EntityType::Channel),
    ForeignKey::required(EntityType::Conversation, "organization_id", EntityType::Organization),
    ForeignKey::required(
        EntityType::ConversationMessage,
        "conversation_id",
        EntityType::Conversation,
    ),
    ForeignKey::required(EntityType::ConversationMessage, "sender_id", EntityType::User),
];

/// Orders `nodes` so that for every edge `(dependent, dependency)` the dependency
/// comes first.
///
/// Ties are broken by the position of each node in `nodes`, so the result is
/// deterministic and independent of edge order. Self-edges are ignored and duplicate
/// edges count once.
///
/// # Errors
/// Returns [`MigrateError::UnknownEntity`] when an edge names a node outside `nodes`
/// and [`MigrateError::CyclicDependency`] naming every node left on a cycle.
pub fn resolve_order<N>(nodes: &[N], edges: &[(N, N)]) -> Result<Vec<N>, MigrateError>
where
    N: Copy + Eq + Display,
{
    let index_of = |node: N| {
        nodes
            .iter()
            .position(|candidate| *candidate == node)
            .ok_or_else(|| MigrateError::UnknownEntity(node.to_string()))
    };

    let mut dependencies = vec![BTreeSet::new(); nodes.len()];
    for (dependent, dependency) in edges {
        let dependent = index_of(*dependent)?;
        let dependency = index_of(*dependency)?;
        if dependent != dependency {
            dependencies[dependent].insert(dependency);
        }
    }

    let mut dependents = vec![Vec::new(); nodes.len()];
    let mut in_degree = vec![0_usize; nodes.len()];
    for (dependent, deps) in dependencies.iter().enumerate() {
        in_degree[dependent] = deps.len();
        for dependency in deps {
            dependents[*dependency].push(dependent);
        }
    }

    let mut ready = (0..nodes.len()).filter(|index| in_degree[*index] == 0).collect::<BTreeSet<_>>();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for dependent in &dependents[next] {
            in_degree[*dependent] -= 1;
            if in_degree[*dependent] == 0 {
                ready.insert(*dependent);
            }
        }
    }

    if order.len() < nodes.len() {
        let stuck = (0..nodes.len())
            .filter(|index| in_degree[*index] > 0)
            .map(|index| nodes[index].to_string())
            .collect();
        return Err(MigrateError::CyclicDependency(stuck));
    }

    Ok(order.into_iter().map(|index| nodes[index]).collect())
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    entities: Vec<EntityType>,
    foreign_keys: Vec<ForeignKey>,
}

impl DependencyGraph {
    #[must_use]
    pub fn new(entities: Vec<EntityType>, foreign_keys: Vec<ForeignKey>) -> Self {
        Self { entities, foreign_keys }
    }

    /// The tracker data model: every entity type with [`FOREIGN_KEYS`].
    #[must_use]
    pub fn standard() -> Self {
        Self::new(EntityType::ALL.to_vec(), FOREIGN_KEYS.to_vec())
    }

    #[must_use]
    pub fn entities(&self) -> &[EntityType] {
        &self.entities
    }

    /// Foreign keys owned by `entity`, in check order.
    #[must_use]
    pub fn foreign_keys_of(&self, entity: EntityType) -> Vec<ForeignKey> {
        self.foreign_keys.iter().filter(|fk| fk.entity == entity).copied().collect()
    }

    /// # Errors
    /// See [`resolve_order`].
    pub fn processing_order(&self) -> Result<Vec<EntityType>, MigrateError> {
        let edges = self
            .foreign_keys
            .iter()
            .map(|fk| (fk.entity, fk.references))
            .collect::<Vec<_>>();
        resolve_order(&self.entities, &edges)
    }
}
