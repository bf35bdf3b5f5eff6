//! Grammar of the Linux CPU list format, built on `nom`.
//!
//! ```text
//! list  := "" | term ("," term)*
//! term  := id | id "-" id
//! id    := [0-9]+
//! ```

use nom::{
    IResult, Parser,
    character::complete::{char, digit1},
    combinator::opt,
    multi::separated_list1,
    sequence::preceded,
};
use runexcl_common::error::{Result, RunexclError};

use super::CpuSet;

/// A parsed term: the first id and, for ranges, the last id.
type Term<'a> = (&'a str, Option<&'a str>);

fn cpu_id(input: &str) -> IResult<&str, &str> {
    digit1(input)
}

fn range_end(input: &str) -> IResult<&str, &str> {
    preceded(char('-'), cpu_id).parse(input)
}

fn term(input: &str) -> IResult<&str, Term<'_>> {
    (cpu_id, opt(range_end)).parse(input)
}

fn terms(input: &str) -> IResult<&str, Vec<Term<'_>>> {
    separated_list1(char(','), term).parse(input)
}

fn syntax_error(input: &str, message: impl Into<String>) -> RunexclError {
    RunexclError::Syntax {
        input: input.to_owned(),
        message: message.into(),
    }
}

fn checked_id(digits: &str, max_cpus: usize) -> Result<usize> {
    // Digit runs too long for usize are just very large ids.
    let cpu = digits.parse::<usize>().unwrap_or(usize::MAX);
    if cpu >= max_cpus {
        return Err(RunexclError::OutOfBounds { cpu, max_cpus });
    }
    Ok(cpu)
}

/// Parses the CPU list at the start of `input`, returning the set and the
/// text following it.
pub(super) fn cpu_list(input: &str, max_cpus: usize) -> Result<(CpuSet, &str)> {
    let mut set = CpuSet::new(max_cpus);
    if input.is_empty() {
        return Ok((set, input));
    }

    let (rest, terms) =
        terms(input).map_err(|_| syntax_error(input, "expected a CPU number"))?;
    match rest.chars().next() {
        Some(',') => return Err(syntax_error(input, "missing CPU number after ','")),
        Some('-') => return Err(syntax_error(input, "missing end of range")),
        _ => {}
    }

    for (lo, hi) in terms {
        let lo = checked_id(lo, max_cpus)?;
        let hi = match hi {
            Some(hi) => checked_id(hi, max_cpus)?,
            None => lo,
        };
        if lo > hi {
            return Err(RunexclError::InvalidRange { lo, hi });
        }
        for cpu in lo..=hi {
            set.insert(cpu);
        }
    }
    Ok((set, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 16;

    #[test]
    fn prefix_stops_before_trailing_input() {
        let (cpus, rest) = CpuSet::parse_prefix("0-2,4,6-7,9\nGarbage", MAX).expect("prefix");
        assert_eq!(cpus.to_string(), "0-2,4,6-7,9");
        assert_eq!(cpus.count(), 7);
        assert_eq!(rest, "\nGarbage");
    }

    #[test]
    fn prefix_of_end_of_input_is_empty_set() {
        let (cpus, rest) = CpuSet::parse_prefix("", MAX).expect("empty");
        assert!(cpus.is_empty());
        assert_eq!(rest, "");

        let (cpus, rest) = CpuSet::parse_prefix("\n", MAX).expect("blank line");
        assert!(cpus.is_empty());
        assert_eq!(rest, "");
    }

    #[test]
    fn prefix_skips_leading_whitespace() {
        let (cpus, rest) = CpuSet::parse_prefix("  3-4\n", MAX).expect("prefix");
        assert_eq!(cpus.to_string(), "3-4");
        assert_eq!(rest, "\n");
    }

    #[test]
    fn prefix_rejects_what_parse_rejects() {
        for text in [",", "0,", "0-", "0-,1", "0-1,", "0-1-", "-1", "\nGarbage"] {
            assert!(
                matches!(
                    CpuSet::parse_prefix(text, MAX),
                    Err(RunexclError::Syntax { .. })
                ),
                "{text:?}"
            );
        }
        assert!(matches!(
            CpuSet::parse_prefix("1-0\n", MAX),
            Err(RunexclError::InvalidRange { .. })
        ));
        assert!(matches!(
            CpuSet::parse_prefix("16", MAX),
            Err(RunexclError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn terms_keep_separator_on_failure() {
        let (rest, parsed) = terms("0-1,").expect("terms");
        assert_eq!(parsed, vec![("0", Some("1"))]);
        assert_eq!(rest, ",");
    }
}
