//! Request router on the primary: picks a worker per request and relays
//! the exchange to it.

pub mod forward;
pub mod router;
pub mod selection;

pub use forward::{Forwarder, ProxyError, strip_hop_by_hop};
pub use router::{HealthReport, ProxyState, create_proxy_router, is_proxied_path};
pub use selection::{
    HealthAwareSelection, RandomSelection, RoundRobinSelection,
    SelectionStrategy, strategy_for,
};
