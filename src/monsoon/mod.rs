//! Monsoon diagnostics
//!
//! - [`wang`]: monsoon precipitation index, annual range and domain skill
//! - [`sperber`]: fractional accumulated precipitation, onset and decay
//!   of the rainy season

pub mod sperber;
pub mod wang;

pub use sperber::{sperber_metrics, OnsetDecay, RegionComposite, SperberConfig};
pub use wang::{mpd, mpi_skill_scores, SkillScores, WangConfig};
