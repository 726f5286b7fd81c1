pub mod error;
pub mod model;
pub mod traits;

pub use error::{BrokerError, StoreError};
pub use model::account::{Account, AccountSnapshot};
pub use model::fill::{Fill, Position};
pub use model::ids::{AccountId, ConnectionId, TenantId};
pub use model::instrument::Instrument;
pub use model::message::MonitorMessage;
pub use model::order::{LegKind, LegStatus, Order, OrderLeg, OrderSide};
pub use model::pnl::{FillRef, PnlMatch};
pub use traits::broker::{BrokerGateway, OrderAck, OrderSpec};
pub use traits::pricing::{FairPrice, FairPriceSource};
pub use traits::store::{LegRef, RegenerationPolicy, StateStore};
