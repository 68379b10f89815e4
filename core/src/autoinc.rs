// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The process-wide auto-increment tracker (spec §5, §9 design note).
//!
//! The original source accepts any numeric scalar via a runtime type
//! assertion; here that is re-expressed as the closed `Numeric` sum type
//! with a total `to_u64` conversion, rejecting non-numeric values at the
//! boundary rather than at an internal `unwrap`.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::table::TableName;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl Numeric {
    /// Total conversion to `u64`: negative values saturate to 0, floats
    /// truncate toward zero and saturate at the `u64` bounds.
    pub fn to_u64(self) -> u64 {
        match self {
            Self::I8(v) => v.max(0) as u64,
            Self::I16(v) => v.max(0) as u64,
            Self::I32(v) => v.max(0) as u64,
            Self::I64(v) => v.max(0) as u64,
            Self::U8(v) => v as u64,
            Self::U16(v) => v as u64,
            Self::U32(v) => v as u64,
            Self::U64(v) => v,
            Self::F32(v) => v.max(0.0) as u64,
            Self::F64(v) => v.max(0.0) as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    max_confirmed: u64,
    written: bool,
}

/// `TableName -> (max_confirmed, written_flag)`, guarded by a single mutex
/// (spec §5): `request`/`confirm` are O(1) and the lock is held only for the
/// critical section, never across a caller's I/O.
#[derive(Debug, Default)]
pub struct AutoIncrementTracker {
    entries: Mutex<HashMap<(String, TableName), Entry>>,
}

impl AutoIncrementTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true iff the table has not been written yet, or `v` exceeds
    /// the max confirmed value; records `v` as the pending value and clears
    /// `written`.
    pub fn request(&self, database: &str, table: &TableName, v: Numeric) -> bool {
        let v = v.to_u64();
        let mut entries = self.entries.lock();
        let entry = entries.entry((database.to_string(), table.clone())).or_default();
        let ok = !entry.written || v > entry.max_confirmed;
        if ok {
            entry.max_confirmed = entry.max_confirmed.max(v);
            entry.written = false;
        }
        ok
    }

    /// Records `v` as confirmed and marks the table written. Confirmed
    /// values observed by a single table must form a non-decreasing
    /// sequence (spec §8); this never lowers `max_confirmed`.
    pub fn confirm(&self, database: &str, table: &TableName, v: Numeric) {
        let v = v.to_u64();
        let mut entries = self.entries.lock();
        let entry = entries.entry((database.to_string(), table.clone())).or_default();
        entry.max_confirmed = entry.max_confirmed.max(v);
        entry.written = true;
    }

    pub fn max_confirmed(&self, database: &str, table: &TableName) -> Option<u64> {
        self.entries
            .lock()
            .get(&(database.to_string(), table.clone()))
            .map(|e| e.max_confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirm_values_are_non_decreasing() {
        let tracker = AutoIncrementTracker::new();
        let table = TableName::unqualified("t");
        tracker.confirm("db", &table, Numeric::U64(5));
        tracker.confirm("db", &table, Numeric::U64(3));
        assert_eq!(tracker.max_confirmed("db", &table), Some(5));
        tracker.confirm("db", &table, Numeric::U64(9));
        assert_eq!(tracker.max_confirmed("db", &table), Some(9));
    }

    #[test]
    fn request_accepts_first_write_unconditionally() {
        let tracker = AutoIncrementTracker::new();
        let table = TableName::unqualified("t");
        assert!(tracker.request("db", &table, Numeric::I64(-1)));
    }

    #[test]
    fn request_rejects_non_increasing_value_after_write() {
        let tracker = AutoIncrementTracker::new();
        let table = TableName::unqualified("t");
        tracker.confirm("db", &table, Numeric::U64(10));
        assert!(!tracker.request("db", &table, Numeric::U64(10)));
        assert!(tracker.request("db", &table, Numeric::U64(11)));
    }

    #[test]
    fn negative_and_float_numerics_saturate_to_u64() {
        assert_eq!(Numeric::I32(-5).to_u64(), 0);
        assert_eq!(Numeric::F64(3.9).to_u64(), 3);
    }
}
