
mod htlcs;
pub use self::htlcs::*;
mod lifecycle;
pub use self::lifecycle::*;
mod subscriptions;
pub use self::subscriptions::*;
mod system;
pub use self::system::*;
