//! Document Context Resolver: turns the stored flat context into a linked
//! graph templates can navigate.

pub mod entities;
pub mod resolver;
pub mod view;

pub use entities::RawDocumentContext;
pub use resolver::{DocumentContext, EntityKind, EntityRef, Question, QuestionKind, Reply, ReplyValue};
pub use view::DocView;
