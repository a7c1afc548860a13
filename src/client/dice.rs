//! Local fallback dice evaluator.
//!
//! When the keyed transport is unavailable the client still honors dice
//! rolls by synthesizing results locally. The parser is deliberately
//! conservative: input is rejected up front unless every character is in a
//! fixed safe set, so a formula can never smuggle anything past the
//! evaluator, and only sums of dice terms and constants are evaluated.

use rand::Rng;

use super::models::{DiceRoll, RollOrigin};
use crate::error::{LinkError, Result};

/// Characters permitted in a formula. Checked before any parsing happens.
const SAFE_CHARS: &str = "0123456789dD+-*/() ";
const MAX_FORMULA_LEN: usize = 64;
const MAX_DICE_PER_TERM: u64 = 100;
const MAX_SIDES: u64 = 10_000;

/// Evaluate `formula` locally. Supports sums of `NdM` dice terms and integer
/// constants joined by `+` and `-`; anything else in the safe character set
/// (multiplication, division, parentheses) is rejected rather than guessed
/// at.
pub fn roll_fallback(formula: &str, reason: Option<&str>) -> Result<DiceRoll> {
    let trimmed = formula.trim();
    if trimmed.is_empty() {
        return Err(LinkError::InvalidFormula("formula is empty".to_string()));
    }
    if trimmed.len() > MAX_FORMULA_LEN {
        return Err(LinkError::InvalidFormula(format!(
            "formula longer than {MAX_FORMULA_LEN} characters"
        )));
    }
    if let Some(bad) = trimmed.chars().find(|c| !SAFE_CHARS.contains(*c)) {
        return Err(LinkError::InvalidFormula(format!(
            "character '{bad}' is not allowed"
        )));
    }
    if trimmed.chars().any(|c| "*/()".contains(c)) {
        return Err(LinkError::InvalidFormula(
            "only dice terms joined by + and - are supported without the game server".to_string(),
        ));
    }

    let compact: String = trimmed
        .chars()
        .filter(|c| *c != ' ')
        .map(|c| c.to_ascii_lowercase())
        .collect();

    let mut total: i64 = 0;
    let mut rolls: Vec<i64> = Vec::new();
    let mut rng = rand::thread_rng();

    for (sign, term) in signed_terms(&compact)? {
        if let Some((count_text, sides_text)) = term.split_once('d') {
            let count: u64 = if count_text.is_empty() {
                1
            } else {
                parse_number(count_text, &term)?
            };
            let sides: u64 = parse_number(sides_text, &term)?;
            if count == 0 || count > MAX_DICE_PER_TERM {
                return Err(LinkError::InvalidFormula(format!(
                    "dice count in '{term}' must be between 1 and {MAX_DICE_PER_TERM}"
                )));
            }
            if sides < 2 || sides > MAX_SIDES {
                return Err(LinkError::InvalidFormula(format!(
                    "die size in '{term}' must be between 2 and {MAX_SIDES}"
                )));
            }
            for _ in 0..count {
                let die = rng.gen_range(1..=sides) as i64;
                rolls.push(die);
                total += sign * die;
            }
        } else {
            let constant: u64 = parse_number(&term, &term)?;
            total += sign * constant as i64;
        }
    }

    Ok(DiceRoll {
        formula: trimmed.to_string(),
        total,
        rolls,
        reason: reason.map(str::to_string),
        origin: RollOrigin::Local,
    })
}

/// Split a compacted formula into `(sign, term)` pairs, e.g. `2d6+3-1d4`
/// becomes `[(1, "2d6"), (1, "3"), (-1, "1d4")]`.
fn signed_terms(compact: &str) -> Result<Vec<(i64, String)>> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut sign: i64 = 1;
    let mut leading_sign_taken = false;

    for c in compact.chars() {
        if c == '+' || c == '-' {
            if current.is_empty() {
                // A single leading sign applies to the first term.
                if terms.is_empty() && !leading_sign_taken {
                    leading_sign_taken = true;
                    sign = if c == '-' { -1 } else { 1 };
                    continue;
                }
                return Err(LinkError::InvalidFormula(
                    "consecutive operators".to_string(),
                ));
            }
            terms.push((sign, std::mem::take(&mut current)));
            sign = if c == '-' { -1 } else { 1 };
        } else {
            current.push(c);
        }
    }

    if current.is_empty() {
        return Err(LinkError::InvalidFormula(
            "formula ends with an operator".to_string(),
        ));
    }
    terms.push((sign, current));
    Ok(terms)
}

fn parse_number(text: &str, term: &str) -> Result<u64> {
    text.parse::<u64>()
        .map_err(|_| LinkError::InvalidFormula(format!("malformed term '{term}'")))
}
