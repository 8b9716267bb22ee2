//! Stochastic simulation of ectoparasite burden on a grooming host.
//!
//! Parasite numbers follow a continuous-time birth-death-immigration chain
//! whose death rate depends on the host's grooming behavior. Many
//! independent runs are simulated exactly, sampled at regular times after a
//! burn-in, and summarized by dispersion statistics (variance-to-mean ratio,
//! negative-binomial k, Gini coefficient) to test how aggregated the burden is.

pub mod analysis;
pub mod config;
pub mod engine;
pub mod manager;
pub mod model;
pub mod rates;
pub mod runner;
pub mod sampler;
pub mod stats;
