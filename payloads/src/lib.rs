//! Wire types shared between the auction engine and its callers: ids,
//! money, domain enums/config, the event catalog, and read-side views.

mod amount;
mod domain;
mod events;
mod ids;
mod views;

pub use amount::*;
pub use domain::*;
pub use events::*;
pub use ids::*;
pub use views::*;
