// Instruction-set profile selection for the vectorizer

use serde::{Deserialize, Serialize};

use crate::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimdProfile {
    /// 128-bit packed lanes; the legacy baseline every target runs.
    Sse128,
    /// 256-bit packed lanes; opt-in.
    Avx256,
}

impl SimdProfile {
    pub fn register_bits(&self) -> u32 {
        match self {
            SimdProfile::Sse128 => 128,
            SimdProfile::Avx256 => 256,
        }
    }

    /// Number of elements of `elem` one packed instruction covers.
    /// Zero means the element type is not vectorizable at all.
    pub fn lane_width(&self, elem: &Type) -> usize {
        match elem {
            Type::I32 | Type::F32 => (self.register_bits() / 32) as usize,
            _ => 0,
        }
    }
}

impl Default for SimdProfile {
    fn default() -> Self {
        SimdProfile::Sse128
    }
}
