//! Internal testing utilities for the absint crates.

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe};

/// Outcome of running a single table-driven case.
enum Outcome {
    Passed,
    Panicked,
    Failed(String),
}

/// Accumulates the descriptions of failing cases and reports them once all
/// cases have run.
#[derive(Default)]
struct Failures {
    cases: Vec<String>,
}

impl Failures {
    fn record(&mut self, case_str: impl FnOnce() -> String, outcome: Outcome) {
        match outcome {
            Outcome::Passed => {}
            Outcome::Panicked => self.cases.push(case_str()),
            Outcome::Failed(err) => self.cases.push(format!("{} => {}", case_str(), err)),
        }
    }

    fn finish(self) {
        assert!(
            self.cases.is_empty(),
            "{} test cases failed: {:?}",
            self.cases.len(),
            self.cases
        );
    }
}

fn catch(test: impl FnOnce() -> Outcome + UnwindSafe) -> Outcome {
    std::panic::catch_unwind(test).unwrap_or(Outcome::Panicked)
}

/// Utility for creating parametrized (aka. table-driven) tests.
///
/// Create a `Debug` struct, conventionally named `Case`, holding the inputs
/// and expectations of one test case. Build a collection of cases and call
/// one of the `test_each*` methods with the test body. Every case runs even
/// if earlier ones fail; the call then panics with the number of failures
/// and the debug representations of the failing cases.
///
/// ## Example
///
/// ```
/// use absint_testing::TestCases;
///
/// #[derive(Debug)]
/// struct Case {
///   dims: Vec<usize>,
///   expected_len: usize,
/// }
///
/// let cases = [
///   Case { dims: vec![2, 3], expected_len: 6 },
///   Case { dims: vec![], expected_len: 1 },
/// ];
///
/// cases.test_each(|case| {
///   assert_eq!(case.dims.iter().product::<usize>(), case.expected_len);
/// });
/// ```
///
/// Fallible test bodies can use [`test_each_result`](TestCases::test_each_result),
/// which reports the returned error next to the failing case instead of
/// requiring an `unwrap` inside the closure.
///
/// ## Unwind safety
///
/// Cases and captured values must be
/// [unwind safe](https://doc.rust-lang.org/std/panic/fn.catch_unwind.html).
/// Values with interior mutability (eg. a canned host with call counters)
/// should be created inside the test body, or wrapped in
/// [`AssertUnwindSafe`](std::panic::AssertUnwindSafe).
pub trait TestCases {
    /// The data for a single test case.
    type Case;

    /// Call `test` with a reference to each case, catching panics.
    fn test_each(self, test: impl Fn(&Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe;

    /// Variant of [`test_each`](TestCases::test_each) which passes a clone of
    /// each case to the test function.
    fn test_each_clone(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + Clone + UnwindSafe;

    /// Variant of [`test_each`](TestCases::test_each) which passes cases by
    /// value. Each case is formatted before the test runs so it can be
    /// reported on failure.
    fn test_each_value(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe;

    /// Variant of [`test_each`](TestCases::test_each) for test bodies which
    /// return a `Result`. A case fails if it panics or returns `Err`.
    fn test_each_result<E: Debug>(self, test: impl Fn(&Self::Case) -> Result<(), E> + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe;
}

impl<I: IntoIterator> TestCases for I {
    type Case = I::Item;

    fn test_each(self, test: impl Fn(&I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe,
    {
        let mut failures = Failures::default();
        for case in self {
            let outcome = catch(|| {
                test(&case);
                Outcome::Passed
            });
            failures.record(|| format!("{:?}", case), outcome);
        }
        failures.finish();
    }

    fn test_each_clone(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        Self::Case: Clone + Debug + UnwindSafe,
    {
        let mut failures = Failures::default();
        for case in self {
            let value = case.clone();
            let test = &test;
            let outcome = catch(move || {
                test(value);
                Outcome::Passed
            });
            failures.record(|| format!("{:?}", case), outcome);
        }
        failures.finish();
    }

    fn test_each_value(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe,
    {
        let mut failures = Failures::default();
        for case in self {
            let test = &test;
            let case_str = format!("{:?}", case);
            let outcome = catch(move || {
                test(case);
                Outcome::Passed
            });
            failures.record(|| case_str, outcome);
        }
        failures.finish();
    }

    fn test_each_result<E: Debug>(
        self,
        test: impl Fn(&I::Item) -> Result<(), E> + RefUnwindSafe,
    ) where
        Self::Case: Debug + RefUnwindSafe,
    {
        let mut failures = Failures::default();
        for case in self {
            let outcome = catch(|| match test(&case) {
                Ok(()) => Outcome::Passed,
                Err(err) => Outcome::Failed(format!("{:?}", err)),
            });
            failures.record(|| format!("{:?}", case), outcome);
        }
        failures.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::TestCases;

    #[derive(Clone, Debug)]
    struct Case {
        x: i32,
    }

    fn cases() -> [Case; 2] {
        [Case { x: 1 }, Case { x: 2 }]
    }

    #[test]
    fn test_test_cases_success() {
        cases().test_each(|case| _ = case.x);
        cases().test_each_clone(|case| _ = case.x);
        cases().test_each_value(|case| _ = case.x);
        cases().test_each_result(|case| if case.x > 0 { Ok(()) } else { Err("negative") });
    }

    #[test]
    #[should_panic(expected = "2 test cases failed")]
    fn test_test_each_failure() {
        cases().test_each(|case| {
            _ = case.x;
            panic!("oh no");
        })
    }

    #[test]
    #[should_panic(expected = "2 test cases failed")]
    fn test_test_each_clone_failure() {
        cases().test_each_clone(|case| {
            _ = case.x;
            panic!("oh no");
        })
    }

    #[test]
    #[should_panic(expected = "1 test cases failed")]
    fn test_test_each_value_failure() {
        cases().test_each_value(|case| assert_eq!(case.x, 1))
    }

    #[test]
    #[should_panic(expected = "too big")]
    fn test_test_each_result_reports_error() {
        cases().test_each_result(|case| if case.x < 2 { Ok(()) } else { Err("too big") })
    }
}
