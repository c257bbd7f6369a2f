//! Incremental aggregate state machines.
//!
//! Each machine maintains one scalar across add/remove/replace events and
//! per-element value changes, updating in O(1) wherever the algebra allows
//! and falling back to a full rescan of live values only when the current
//! extremum (or recorded selection) is lost.
//!
//! Machines only ever see valid values; occurrences whose computation is
//! faulted are excluded by the caller and gated behind an aggregate fault.

use tracing::debug;
use vigil_core::{Fault, Value};

/// Which end of the ordering an extremum or selection machine maintains.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Preference {
    Smallest,
    Largest,
}

impl Preference {
    /// Returns true if `candidate` is strictly more extreme than `current`.
    fn beats(self, candidate: &Value, current: &Value) -> bool {
        match self {
            Preference::Smallest => candidate < current,
            Preference::Largest => candidate > current,
        }
    }
}

/// Incremental SUM: O(1) per event via numeric add/subtract.
#[derive(Clone, Debug)]
pub struct SumState {
    sum: Value,
    contributing: usize,
    non_numeric: usize,
}

impl Default for SumState {
    fn default() -> Self {
        Self::new()
    }
}

impl SumState {
    /// Creates an empty sum.
    pub fn new() -> Self {
        Self {
            sum: Value::Int64(0),
            contributing: 0,
            non_numeric: 0,
        }
    }

    /// Folds one value in.
    pub fn add(&mut self, value: &Value) {
        match self.sum.add_numeric(value) {
            Some(sum) => {
                self.sum = sum;
                self.contributing += 1;
            }
            None => self.non_numeric += 1,
        }
    }

    /// Folds one value out.
    pub fn remove(&mut self, value: &Value) {
        match self.sum.sub_numeric(value) {
            Some(sum) => {
                self.sum = sum;
                self.contributing -= 1;
            }
            None => self.non_numeric -= 1,
        }
    }

    /// Replaces one contribution.
    pub fn replace(&mut self, old: &Value, new: &Value) {
        self.remove(old);
        self.add(new);
    }

    /// Number of live values folded in, numeric or not.
    pub fn count(&self) -> usize {
        self.contributing + self.non_numeric
    }

    /// Current sum. The sum of an empty sequence is zero.
    pub fn current(&self) -> Result<Value, Fault> {
        if self.non_numeric > 0 {
            Err(Fault::aggregate(Fault::evaluation(
                "sum over a non-numeric value",
            )))
        } else {
            Ok(self.sum.clone())
        }
    }
}

/// Incremental AVERAGE, derived from the maintained sum and live count.
#[derive(Clone, Debug, Default)]
pub struct AverageState {
    sum: SumState,
}

impl AverageState {
    /// Creates an empty average.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one value in.
    pub fn add(&mut self, value: &Value) {
        self.sum.add(value);
    }

    /// Folds one value out.
    pub fn remove(&mut self, value: &Value) {
        self.sum.remove(value);
    }

    /// Replaces one contribution.
    pub fn replace(&mut self, old: &Value, new: &Value) {
        self.sum.replace(old, new);
    }

    /// Current average; faults on an empty sequence.
    pub fn current(&self) -> Result<Value, Fault> {
        if self.sum.count() == 0 {
            return Err(Fault::EmptySequence);
        }
        let sum = self.sum.current()?;
        let total = sum.numeric().unwrap_or_default();
        Ok(Value::Float64(total / self.sum.count() as f64))
    }
}

/// Incremental MIN/MAX.
///
/// Nothing beyond the current extremum is persisted; removing or degrading
/// the extremum triggers a full rescan of all live values.
#[derive(Clone, Debug)]
pub struct ExtremumState {
    prefer: Preference,
    current: Option<Value>,
    count: usize,
}

impl ExtremumState {
    /// Creates an empty extremum state.
    pub fn new(prefer: Preference) -> Self {
        Self {
            prefer,
            current: None,
            count: 0,
        }
    }

    /// The end of the ordering this state maintains.
    pub fn preference(&self) -> Preference {
        self.prefer
    }

    /// Folds one value in; never rescans.
    pub fn add(&mut self, value: &Value) {
        self.count += 1;
        match &self.current {
            Some(current) if !self.prefer.beats(value, current) => {}
            _ => self.current = Some(value.clone()),
        }
    }

    /// Folds one value out.
    ///
    /// Rescans only when the removed value equals the current extremum
    /// under the comparer; equal extrema may exist, and the rescan finds
    /// the surviving one.
    pub fn remove<I>(&mut self, value: &Value, live: impl FnOnce() -> I)
    where
        I: Iterator<Item = Value>,
    {
        self.count -= 1;
        if self.count == 0 {
            self.current = None;
            return;
        }
        if self.current.as_ref() == Some(value) {
            self.rescan(live());
        }
    }

    /// Replaces one contribution in place.
    ///
    /// Tightening never rescans; losing the extremum status does. `live`
    /// must already reflect the new value.
    pub fn replace<I>(&mut self, old: &Value, new: &Value, live: impl FnOnce() -> I)
    where
        I: Iterator<Item = Value>,
    {
        if self.current.as_ref() == Some(old) {
            if new == old {
                return;
            }
            if self.prefer.beats(new, old) {
                self.current = Some(new.clone());
            } else {
                self.rescan(live());
            }
        } else if let Some(current) = &self.current {
            if self.prefer.beats(new, current) {
                self.current = Some(new.clone());
            }
        }
    }

    /// Current extremum; faults on an empty sequence.
    pub fn current(&self) -> Result<Value, Fault> {
        self.current.clone().ok_or(Fault::EmptySequence)
    }

    fn rescan<I>(&mut self, live: I)
    where
        I: Iterator<Item = Value>,
    {
        debug!(prefer = ?self.prefer, "extremum lost, rescanning live values");
        let mut best: Option<Value> = None;
        for value in live {
            match &best {
                Some(current) if !self.prefer.beats(&value, current) => {}
                _ => best = Some(value),
            }
        }
        self.current = best;
    }
}

/// Incremental FIRST/LAST over a supplied sort key.
///
/// Records the current front/back element; a new element replaces it only
/// with a strictly more extreme key, so ties keep the incumbent.
#[derive(Clone, Debug)]
pub struct SelectionState {
    prefer: Preference,
    current: Option<(Value, Value)>,
    count: usize,
}

impl SelectionState {
    /// Creates an empty selection state.
    pub fn new(prefer: Preference) -> Self {
        Self {
            prefer,
            current: None,
            count: 0,
        }
    }

    /// The end of the ordering this state maintains.
    pub fn preference(&self) -> Preference {
        self.prefer
    }

    /// Folds one (key, element) in.
    pub fn add(&mut self, key: &Value, element: &Value) {
        self.count += 1;
        match &self.current {
            Some((recorded, _)) if !self.prefer.beats(key, recorded) => {}
            _ => self.current = Some((key.clone(), element.clone())),
        }
    }

    /// Folds one (key, element) out, recomputing the candidate from the
    /// live set when the recorded one leaves.
    pub fn remove<I>(&mut self, key: &Value, element: &Value, live: impl FnOnce() -> I)
    where
        I: Iterator<Item = (Value, Value)>,
    {
        self.count -= 1;
        if self.count == 0 {
            self.current = None;
            return;
        }
        if self
            .current
            .as_ref()
            .is_some_and(|(recorded_key, recorded)| recorded_key == key && recorded == element)
        {
            self.rescan(live());
        }
    }

    /// Handles a key change for one element.
    pub fn replace_key<I>(
        &mut self,
        old_key: &Value,
        new_key: &Value,
        element: &Value,
        live: impl FnOnce() -> I,
    ) where
        I: Iterator<Item = (Value, Value)>,
    {
        if self
            .current
            .as_ref()
            .is_some_and(|(recorded_key, recorded)| recorded_key == old_key && recorded == element)
        {
            if new_key == old_key {
                return;
            }
            if self.prefer.beats(new_key, old_key) {
                self.current = Some((new_key.clone(), element.clone()));
            } else {
                self.rescan(live());
            }
        } else if let Some((recorded, _)) = &self.current {
            if self.prefer.beats(new_key, recorded) {
                self.current = Some((new_key.clone(), element.clone()));
            }
        }
    }

    /// Current selected element; faults on an empty sequence.
    pub fn current(&self) -> Result<Value, Fault> {
        self.current
            .as_ref()
            .map(|(_, element)| element.clone())
            .ok_or(Fault::EmptySequence)
    }

    fn rescan<I>(&mut self, live: I)
    where
        I: Iterator<Item = (Value, Value)>,
    {
        debug!(prefer = ?self.prefer, "selection lost, rescanning live set");
        let mut best: Option<(Value, Value)> = None;
        for (key, element) in live {
            match &best {
                Some((recorded, _)) if !self.prefer.beats(&key, recorded) => {}
                _ => best = Some((key, element)),
            }
        }
        self.current = best;
    }
}

/// Incremental SINGLE / SINGLE-OR-DEFAULT.
///
/// The more-than-one fault flips strictly on crossing the 0/1/2+
/// membership boundaries.
#[derive(Clone, Debug)]
pub struct SingleState {
    count: usize,
    current: Option<Value>,
    default: Option<Value>,
}

impl SingleState {
    /// Creates a state faulting on empty.
    pub fn new() -> Self {
        Self {
            count: 0,
            current: None,
            default: None,
        }
    }

    /// Creates a state yielding `default` on empty.
    pub fn with_default(default: Value) -> Self {
        Self {
            count: 0,
            current: None,
            default: Some(default),
        }
    }

    /// An empty state with the same default behavior.
    pub fn fresh_like(&self) -> Self {
        Self {
            count: 0,
            current: None,
            default: self.default.clone(),
        }
    }

    /// Folds one element in.
    pub fn add(&mut self, element: &Value) {
        self.count += 1;
        self.current = if self.count == 1 {
            Some(element.clone())
        } else {
            None
        };
    }

    /// Folds one element out; on a 2+→1 transition the survivor comes from
    /// the live set.
    pub fn remove<I>(&mut self, live: impl FnOnce() -> I)
    where
        I: Iterator<Item = Value>,
    {
        self.count -= 1;
        self.current = if self.count == 1 { live().next() } else { None };
    }

    /// Handles a value change of the singleton element.
    pub fn replace(&mut self, new: &Value) {
        if self.count == 1 {
            self.current = Some(new.clone());
        }
    }

    /// Current element, the default, or a membership fault.
    pub fn current(&self) -> Result<Value, Fault> {
        match self.count {
            0 => self.default.clone().ok_or(Fault::EmptySequence),
            1 => self
                .current
                .clone()
                .ok_or_else(|| Fault::evaluation("singleton value missing")),
            _ => Err(Fault::MultipleElements),
        }
    }
}

impl Default for SingleState {
    fn default() -> Self {
        Self::new()
    }
}
