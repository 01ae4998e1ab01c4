use crate::error::TaskError;
use crate::task::Outcome;

use std::iter::Enumerate;
use std::vec::IntoIter;

/// Bookkeeping for one invocation of the pool over one input sequence.
///
/// This is the explicit state machine behind a run: a FIFO admission cursor over
/// the inputs, a pre-sized slot per input, and the in-flight counter that
/// enforces `in_flight <= min(limit, total)`. It never awaits; the dispatch loop
/// in `pool.rs` is the only place that suspends.
pub(crate) struct Run<T, R, E> {
  run_id: u64,
  limit: usize,
  total: usize,
  pending: Enumerate<IntoIter<T>>,
  slots: Vec<Option<Outcome<R, E>>>,
  in_flight: usize,
  admitted: usize,
  admitting: bool,
  high_water_mark: usize,
}

impl<T, R, E> Run<T, R, E> {
  /// `limit` must already be validated as non-zero; it is clamped to the input count.
  pub(crate) fn new(run_id: u64, limit: usize, inputs: Vec<T>) -> Self {
    let total = inputs.len();
    let mut slots = Vec::with_capacity(total);
    slots.resize_with(total, || None);

    Self {
      run_id,
      limit: limit.min(total),
      total,
      pending: inputs.into_iter().enumerate(),
      slots,
      in_flight: 0,
      admitted: 0,
      admitting: true,
      high_water_mark: 0,
    }
  }

  pub(crate) fn run_id(&self) -> u64 {
    self.run_id
  }

  /// The effective concurrency bound, `min(limit, total)`.
  pub(crate) fn limit(&self) -> usize {
    self.limit
  }

  pub(crate) fn total(&self) -> usize {
    self.total
  }

  pub(crate) fn in_flight(&self) -> usize {
    self.in_flight
  }

  pub(crate) fn admitted(&self) -> usize {
    self.admitted
  }

  pub(crate) fn high_water_mark(&self) -> usize {
    self.high_water_mark
  }

  pub(crate) fn is_admitting(&self) -> bool {
    self.admitting
  }

  pub(crate) fn can_admit(&self) -> bool {
    self.admitting && self.admitted < self.total && self.in_flight < self.limit
  }

  /// Takes the next input, in input order, if a slot is free.
  ///
  /// Each input is yielded at most once; calling this again for the same freed
  /// slot returns `None` once the bound is reached.
  pub(crate) fn admit(&mut self) -> Option<(usize, T)> {
    if !self.can_admit() {
      return None;
    }
    let (index, input) = self.pending.next()?;
    self.in_flight += 1;
    self.admitted += 1;
    self.high_water_mark = self.high_water_mark.max(self.in_flight);
    Some((index, input))
  }

  /// No further inputs will be admitted. In-flight executions are unaffected.
  pub(crate) fn stop_admission(&mut self) {
    self.admitting = false;
  }

  /// Writes the outcome for an in-flight index and frees its slot.
  ///
  /// Returns the outcome back if the index is unknown, was never admitted, or
  /// already settled; the run state is left untouched in that case.
  pub(crate) fn record(&mut self, index: usize, outcome: Outcome<R, E>) -> Result<(), Outcome<R, E>> {
    if index >= self.admitted {
      return Err(outcome);
    }
    match self.slots.get_mut(index) {
      Some(slot) if slot.is_none() => {
        *slot = Some(outcome);
        self.in_flight -= 1;
        Ok(())
      }
      _ => Err(outcome),
    }
  }

  /// True once nothing is in flight and nothing more will be admitted.
  pub(crate) fn is_finished(&self) -> bool {
    self.in_flight == 0 && (!self.admitting || self.admitted == self.total)
  }

  /// Per-index outcomes in input order. Inputs that were never admitted are
  /// reported as `TaskError::NotAdmitted`.
  pub(crate) fn into_outcomes(self) -> Vec<Outcome<R, E>> {
    self
      .slots
      .into_iter()
      .map(|slot| slot.unwrap_or(Err(TaskError::NotAdmitted)))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  type TestRun = Run<&'static str, u32, String>;

  #[test]
  fn test_admission_is_fifo_and_bounded() {
    let mut run = TestRun::new(1, 2, vec!["a", "b", "c", "d"]);

    assert_eq!(run.admit(), Some((0, "a")));
    assert_eq!(run.admit(), Some((1, "b")));
    assert_eq!(run.admit(), None, "third admission must wait for a free slot");
    assert_eq!(run.in_flight(), 2);

    run.record(1, Ok(10)).unwrap();
    assert_eq!(run.admit(), Some((2, "c")));
    assert_eq!(run.admit(), None);
    assert_eq!(run.high_water_mark(), 2);
  }

  #[test]
  fn test_one_freed_slot_admits_exactly_one_input() {
    let mut run = TestRun::new(1, 1, vec!["a", "b", "c"]);
    assert_eq!(run.admit(), Some((0, "a")));

    run.record(0, Ok(1)).unwrap();
    assert_eq!(run.admit(), Some((1, "b")));
    assert_eq!(run.admit(), None);
    assert_eq!(run.admit(), None);
    assert_eq!(run.admitted(), 2);
  }

  #[test]
  fn test_limit_is_clamped_to_input_count() {
    let run = TestRun::new(1, 64, vec!["a", "b"]);
    assert_eq!(run.limit(), 2);
    assert_eq!(run.total(), 2);
  }

  #[test]
  fn test_empty_run_is_finished_immediately() {
    let mut run = TestRun::new(1, 4, Vec::new());
    assert!(run.is_finished());
    assert_eq!(run.admit(), None);
    assert!(run.into_outcomes().is_empty());
  }

  #[test]
  fn test_record_rejects_double_settlement_and_unadmitted_index() {
    let mut run = TestRun::new(1, 2, vec!["a", "b", "c"]);
    run.admit();

    assert_eq!(run.record(2, Ok(3)), Err(Ok(3)), "index 2 was never admitted");
    run.record(0, Ok(1)).unwrap();
    assert_eq!(run.record(0, Ok(99)), Err(Ok(99)));
    assert_eq!(run.in_flight(), 0);
  }

  #[test]
  fn test_outcomes_follow_input_order_not_settlement_order() {
    let mut run = TestRun::new(1, 3, vec!["a", "b", "c"]);
    while run.admit().is_some() {}

    run.record(2, Ok(30)).unwrap();
    run.record(0, Err(TaskError::Failed("bad".to_string()))).unwrap();
    run.record(1, Ok(20)).unwrap();

    assert!(run.is_finished());
    assert_eq!(
      run.into_outcomes(),
      vec![Err(TaskError::Failed("bad".to_string())), Ok(20), Ok(30)]
    );
  }

  #[test]
  fn test_stopped_run_reports_unadmitted_inputs() {
    let mut run = TestRun::new(1, 1, vec!["a", "b", "c"]);
    run.admit();
    run.stop_admission();

    assert!(!run.can_admit());
    assert!(!run.is_finished(), "index 0 is still in flight");

    run.record(0, Ok(1)).unwrap();
    assert!(run.is_finished());
    assert_eq!(
      run.into_outcomes(),
      vec![Ok(1), Err(TaskError::NotAdmitted), Err(TaskError::NotAdmitted)]
    );
  }
}
