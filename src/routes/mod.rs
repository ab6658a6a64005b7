/// Router Modules
///
/// Routing is split by resource:
/// - **entries**: the key/value surface at `/`.
/// - **auth**: identity introspection at `/auth` plus `/health`.
///
/// No route is gated by middleware. Every handler receives the caller's
/// `AuthOutcome` and applies the visibility or ownership rules itself.
pub mod auth;
pub mod entries;
