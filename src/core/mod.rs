pub mod dispatcher;
pub mod resolver;
pub mod route;
pub mod transform;

pub use dispatcher::{DEFAULT_ACTIVITY_TIMEOUT, DispatchOutcome, ForwardError, ProxyDispatcher};
pub use resolver::{
    BuildSessionResolver, EndpointResolver, MatchResolver, PortSelection, ResolutionError,
    ResolutionOutcome, ResolvedEndpoint,
};
pub use route::{
    ForwardTail, MatchId, ParsedRoute, Region, RouteError, RouteKey, RouteScheme, format_route,
    parse_route,
};
pub use transform::{TransformError, transform};
