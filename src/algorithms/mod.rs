//! Core algorithms: feature extraction, continuous-time trajectory model,
//! correspondence matching and residuals.

pub mod features;
pub mod matching;
pub mod trajectory;
