//! Row models for every persisted entity.

mod conversation;
mod interaction;
mod lore;
mod memory_node;
mod message;
mod relationship;
mod rule;
mod saga;
mod snapshot;

pub use conversation::Conversation;
pub use interaction::{InteractionLog, NewInteractionLog};
pub use lore::{LoreEntry, LoreSource, NewLoreEntry};
pub use memory_node::{MemoryNode, NewMemoryNode, Tier};
pub use message::{MessageRecord, NewMessage, Role};
pub use relationship::RelationshipEdge;
pub use rule::{NewRuleFragment, RuleFragment, ScopeType};
pub use saga::SagaEntry;
pub use snapshot::{NewSnapshot, WorldStateSnapshot};
