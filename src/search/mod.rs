//! Move selection for actors and benchmark games.
//!
//! The training pipeline only needs a `SearchProcedure` that returns an
//! action and the value of the resulting position. Two are provided:
//!
//! - **OnePlySearch**: expectimax over the learned model's values; used by
//!   actors and by the learned side of benchmark games
//! - **RolloutSearch**: random playouts at a fixed budget; the benchmark
//!   opponent

pub mod one_ply;
pub mod rollout;
pub mod traits;

pub use one_ply::OnePlySearch;
pub use rollout::{random_playout, RolloutSearch};
pub use traits::{expected_value, for_player, PositionEvaluator, SearchProcedure, SearchResult};
