//!
//! popflow computes traffic-engineering allocations: path based
//! multi-commodity flow LPs, their POP partitioned variant, and a solver-free
//! dual subgradient method.
//!
pub mod te;
