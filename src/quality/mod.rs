// Offline Learning Core - Low-bandwidth Content Delivery
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Quality ladder and selection
//!
//! ## profile
//! The fixed encoding ladder (`high` ... `audio_only`) and queue priorities.
//!
//! ## selector
//! Pure functions mapping bandwidth to a rung, and gating rungs by source
//! resolution so nothing is ever upscaled.

pub mod profile;
pub mod selector;

pub use profile::{Priority, QualityName, QualityProfile, Resolution};
pub use selector::{effective_quality, offered_qualities, select_quality};
