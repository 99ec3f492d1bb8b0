//! Swap data model
//!
//! - `SwapState`: lifecycle states and the allowed transitions
//! - `SwapRecord`: the persisted entity, direction carried as a tagged `SwapKind`
//! - `SwapRequest`: the intermediary quote validated before a record exists

mod record;
mod request;
mod state;
mod success_action;

pub use record::{derive_swap_id, Direction, SwapKind, SwapRecord};
pub use request::{decode_payment_hash, SwapRequest};
pub use state::SwapState;
pub use success_action::{SuccessAction, MAX_SUCCESS_ACTION_LEN};
