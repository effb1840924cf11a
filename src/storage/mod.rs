mod episodes;
mod schema;
mod subscriptions;
mod types;

pub use schema::Database;
pub use types::{
    ArchivedEpisode, DatabaseError, Episode, FetchedEpisode, NewSubscription, OwnerId,
    PendingEpisode, Subscription, UpsertSummary,
};
