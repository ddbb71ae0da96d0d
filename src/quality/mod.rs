//! Quality Evaluator: one-sided/two-sided tolerance checks, cycle verdicts,
//! shift counters and per-parameter tallies, per spec.md §4.6.

use crate::measurement::Reduction;
use crate::registers::{map::holding, map::input, Bank, RegisterStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verdict {
    Good = 0,
    ConditionallyGood = 1,
    Bad = 2,
}

fn worst(a: Verdict, b: Verdict) -> Verdict {
    if a > b {
        a
    } else {
        b
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub base: f32,
    pub cond_bad_error: f32,
    pub bad_error: f32,
    pub positive_bad_error: Option<f32>,
}

/// One-sided rule: values above `base` are bad; the conditional band sits
/// below `base`, narrowing toward `bad`.
pub fn evaluate_one_sided(t: &Thresholds, v: f32) -> Verdict {
    if v > t.base {
        Verdict::Bad
    } else if v >= t.base + t.cond_bad_error {
        Verdict::Good
    } else if v >= t.base + t.bad_error {
        Verdict::ConditionallyGood
    } else {
        Verdict::Bad
    }
}

/// Two-sided rule: see DESIGN.md for why `cond_bad_error` is not consulted
/// here — the worked example in spec.md §8 is only consistent with GOOD
/// spanning `[base, base + positive_bad_error]` and CONDITIONALLY_GOOD
/// spanning `[base + bad_error, base)`.
pub fn evaluate_two_sided(t: &Thresholds, v: f32) -> Verdict {
    let positive_bad_error = t.positive_bad_error.unwrap_or(0.0);
    if v > t.base + positive_bad_error {
        Verdict::Bad
    } else if v >= t.base {
        Verdict::Good
    } else if v >= t.base + t.bad_error {
        Verdict::ConditionallyGood
    } else {
        Verdict::Bad
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    AllThree,
    AvgOnly,
    MaxAndAvg,
    MinAndAvg,
}

impl CheckMode {
    pub fn from_register(value: u16) -> Self {
        match value {
            1 => CheckMode::AvgOnly,
            2 => CheckMode::MaxAndAvg,
            3 => CheckMode::MinAndAvg,
            _ => CheckMode::AllThree,
        }
    }

    fn selected(self, r: &Reduction) -> Vec<f32> {
        match self {
            CheckMode::AllThree => vec![r.max, r.avg, r.min],
            CheckMode::AvgOnly => vec![r.avg],
            CheckMode::MaxAndAvg => vec![r.max, r.avg],
            CheckMode::MinAndAvg => vec![r.min, r.avg],
        }
    }
}

/// Evaluates a parameter's verdict as the worst verdict among the values
/// selected by `mode`.
pub fn evaluate_parameter(
    t: &Thresholds,
    r: &Reduction,
    mode: CheckMode,
    two_sided: bool,
) -> Verdict {
    let eval = if two_sided {
        evaluate_two_sided
    } else {
        evaluate_one_sided
    };
    mode.selected(r)
        .into_iter()
        .map(|v| eval(t, v))
        .fold(Verdict::Good, worst)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parameter {
    Height,
    UpperWall,
    FlangeThickness,
    LowerWall,
    Bottom,
    FlangeDiameter,
    BodyDiameter,
    Body2Diameter,
}

impl Parameter {
    pub fn is_two_sided(self) -> bool {
        matches!(self, Parameter::LowerWall | Parameter::Bottom)
    }

    fn threshold_base_addr(self) -> u16 {
        match self {
            Parameter::Height => holding::THRESHOLD_HEIGHT,
            Parameter::UpperWall => holding::THRESHOLD_UPPER_WALL,
            Parameter::FlangeThickness => holding::THRESHOLD_FLANGE_THICKNESS,
            Parameter::LowerWall => holding::THRESHOLD_LOWER_WALL,
            Parameter::Bottom => holding::THRESHOLD_BOTTOM,
            Parameter::FlangeDiameter => holding::THRESHOLD_FLANGE_DIAMETER,
            Parameter::BodyDiameter => holding::THRESHOLD_BODY_DIAMETER,
            Parameter::Body2Diameter => holding::THRESHOLD_BODY2_BASE,
        }
    }

    fn positive_bad_addr(self) -> Option<u16> {
        match self {
            Parameter::Bottom => Some(holding::POSITIVE_BAD_BOTTOM),
            Parameter::LowerWall => Some(holding::POSITIVE_BAD_LOWER_WALL),
            _ => None,
        }
    }
}

pub fn read_thresholds(store: &RegisterStore, param: Parameter) -> Thresholds {
    let base_addr = param.threshold_base_addr();
    let base = store.get_f32(Bank::Holding, base_addr);
    let cond_bad_error = store.get_f32(Bank::Holding, base_addr + 2);
    let bad_error = store.get_f32(Bank::Holding, base_addr + 4);
    let positive_bad_error = param
        .positive_bad_addr()
        .map(|addr| store.get_f32(Bank::Holding, addr));
    Thresholds {
        base,
        cond_bad_error,
        bad_error,
        positive_bad_error,
    }
}

/// Reads a parameter's measured `{max, avg, min}` triple. `Height` and
/// `FlangeThickness` are PLC-supplied scalars (see DESIGN.md); they are
/// represented as a degenerate triple with all three fields equal.
pub fn read_reduction(store: &RegisterStore, param: Parameter) -> Reduction {
    let triple_addr = match param {
        Parameter::UpperWall => Some(input::UPPER_WALL_TRIPLE),
        Parameter::LowerWall => Some(input::LOWER_WALL_TRIPLE),
        Parameter::Bottom => Some(input::BOTTOM_TRIPLE),
        Parameter::BodyDiameter => Some(input::BODY_DIAMETER_TRIPLE),
        Parameter::FlangeDiameter => Some(input::FLANGE_DIAMETER_TRIPLE),
        Parameter::Body2Diameter => Some(input::BODY2_DIAMETER_TRIPLE),
        Parameter::Height | Parameter::FlangeThickness => None,
    };
    if let Some(addr) = triple_addr {
        let max = store.get_f32(Bank::Input, addr);
        let avg = store.get_f32(Bank::Input, addr + 2);
        let min = store.get_f32(Bank::Input, addr + 4);
        return Reduction { max, avg, min };
    }
    let scalar_addr = match param {
        Parameter::Height => holding::MEASURED_HEIGHT_PLC,
        Parameter::FlangeThickness => holding::MEASURED_FLANGE_THICKNESS_PLC,
        _ => unreachable!(),
    };
    let v = store.get_f32(Bank::Holding, scalar_addr);
    Reduction { max: v, avg: v, min: v }
}

/// Direction of a non-GOOD verdict, used to pick the matching tally
/// register: a value above the good range is "greater", below it is
/// "less".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Less,
    Greater,
}

fn direction_for(param: Parameter, t: &Thresholds, avg: f32) -> Direction {
    let upper_bound = if param.is_two_sided() {
        t.base + t.positive_bad_error.unwrap_or(0.0)
    } else {
        t.base
    };
    if avg > upper_bound {
        Direction::Greater
    } else {
        Direction::Less
    }
}

fn cond_bad_tally_addr(param: Parameter, direction: Direction) -> u16 {
    use input::*;
    match (param, direction) {
        (Parameter::Height, _) => COND_BAD_HEIGHT,
        (Parameter::UpperWall, _) => COND_BAD_UPPER_WALL,
        (Parameter::FlangeThickness, _) => COND_BAD_FLANGE_THICKNESS,
        (Parameter::LowerWall, Direction::Greater) => COND_BAD_LOWER_WALL_GREATER,
        (Parameter::LowerWall, Direction::Less) => COND_BAD_LOWER_WALL_LESS,
        (Parameter::Bottom, Direction::Less) => COND_BAD_BOTTOM_LESS,
        (Parameter::Bottom, Direction::Greater) => COND_BAD_BOTTOM_GREATER,
        (Parameter::FlangeDiameter, _) => COND_BAD_FLANGE_DIAMETER,
        (Parameter::BodyDiameter, _) => COND_BAD_BODY_DIAMETER,
        (Parameter::Body2Diameter, _) => return 0, // no dedicated tally register
    }
}

fn bad_tally_addr(param: Parameter, direction: Direction) -> u16 {
    use input::*;
    match (param, direction) {
        (Parameter::Height, Direction::Less) => BAD_HEIGHT_LESS,
        (Parameter::Height, Direction::Greater) => BAD_HEIGHT_GREATER,
        (Parameter::UpperWall, Direction::Less) => BAD_UPPER_WALL_LESS,
        (Parameter::UpperWall, Direction::Greater) => BAD_UPPER_WALL_GREATER,
        (Parameter::FlangeThickness, Direction::Less) => BAD_FLANGE_THICKNESS_LESS,
        (Parameter::FlangeThickness, Direction::Greater) => BAD_FLANGE_THICKNESS_GREATER,
        (Parameter::LowerWall, Direction::Less) => BAD_LOWER_WALL_LESS,
        (Parameter::LowerWall, Direction::Greater) => BAD_LOWER_WALL_GREATER,
        (Parameter::Bottom, Direction::Less) => BAD_BOTTOM_LESS,
        (Parameter::Bottom, Direction::Greater) => BAD_BOTTOM_GREATER,
        (Parameter::FlangeDiameter, Direction::Less) => BAD_FLANGE_DIAMETER_LESS,
        (Parameter::FlangeDiameter, Direction::Greater) => BAD_FLANGE_DIAMETER_GREATER,
        (Parameter::BodyDiameter, Direction::Less) => BAD_BODY_DIAMETER_LESS,
        (Parameter::BodyDiameter, Direction::Greater) => BAD_BODY_DIAMETER_GREATER,
        (Parameter::Body2Diameter, _) => 0,
    }
}

fn increment_saturating(store: &RegisterStore, bank: Bank, addr: u16) {
    if addr == 0 {
        return;
    }
    let current = store.get_word(bank, addr);
    store.set_word(bank, addr, current.saturating_add(1));
}

const CORE_PARAMETERS: [Parameter; 7] = [
    Parameter::Height,
    Parameter::UpperWall,
    Parameter::FlangeThickness,
    Parameter::LowerWall,
    Parameter::Bottom,
    Parameter::FlangeDiameter,
    Parameter::BodyDiameter,
];

/// Runs CMD=16's full quality evaluation against the current register
/// state, updates shift counters and tallies, and returns the cycle
/// verdict.
pub fn evaluate_cycle(store: &RegisterStore, body2_quality_required: bool) -> Verdict {
    let mode = CheckMode::from_register(store.get_word(Bank::Holding, holding::CHECK_MODE));
    let allowed_cond = store.get_word(Bank::Holding, holding::ALLOWED_COND_BAD_COUNT);
    let allowed_bad = store.get_word(Bank::Holding, holding::ALLOWED_BAD_COUNT);

    let mut cond_count = 0u16;
    let mut bad_count = 0u16;

    let mut parameters: Vec<Parameter> = CORE_PARAMETERS.to_vec();
    if body2_quality_required {
        parameters.push(Parameter::Body2Diameter);
    }

    for param in parameters {
        let thresholds = read_thresholds(store, param);
        let reduction = read_reduction(store, param);
        let verdict = evaluate_parameter(&thresholds, &reduction, mode, param.is_two_sided());
        match verdict {
            Verdict::Good => {}
            Verdict::ConditionallyGood => {
                cond_count += 1;
                let direction = direction_for(param, &thresholds, reduction.avg);
                increment_saturating(store, Bank::Input, cond_bad_tally_addr(param, direction));
            }
            Verdict::Bad => {
                bad_count += 1;
                let direction = direction_for(param, &thresholds, reduction.avg);
                increment_saturating(store, Bank::Input, bad_tally_addr(param, direction));
            }
        }
    }

    let cycle_verdict = if bad_count > allowed_bad {
        Verdict::Bad
    } else if cond_count > allowed_cond {
        Verdict::ConditionallyGood
    } else {
        Verdict::Good
    };

    let total = store.get_word(Bank::Input, input::SHIFT_COUNTERS);
    store.set_word(Bank::Input, input::SHIFT_COUNTERS, total.saturating_add(1));
    let verdict_offset = match cycle_verdict {
        Verdict::Good => 1,
        Verdict::ConditionallyGood => 2,
        Verdict::Bad => 3,
    };
    let addr = input::SHIFT_COUNTERS + verdict_offset;
    let current = store.get_word(Bank::Input, addr);
    store.set_word(Bank::Input, addr, current.saturating_add(1));

    let product_number = store.get_word(Bank::Holding, holding::PRODUCT_NUMBER);
    store.set_word(Bank::Holding, holding::PRODUCT_NUMBER, product_number.saturating_add(1));

    cycle_verdict
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_sided_scenario_matches_spec() {
        let t = Thresholds {
            base: 5.0,
            cond_bad_error: -0.2,
            bad_error: -0.5,
            positive_bad_error: None,
        };
        assert_eq!(evaluate_one_sided(&t, 4.85), Verdict::Good);
        assert_eq!(evaluate_one_sided(&t, 4.7), Verdict::ConditionallyGood);
        assert_eq!(evaluate_one_sided(&t, 4.4), Verdict::Bad);
        assert_eq!(evaluate_one_sided(&t, 5.1), Verdict::Bad);
    }

    #[test]
    fn two_sided_scenario_matches_spec() {
        let t = Thresholds {
            base: 2.0,
            cond_bad_error: -0.3,
            bad_error: -0.6,
            positive_bad_error: Some(0.4),
        };
        assert_eq!(evaluate_two_sided(&t, 2.3), Verdict::Good);
        assert_eq!(evaluate_two_sided(&t, 2.45), Verdict::Bad);
        assert_eq!(evaluate_two_sided(&t, 1.75), Verdict::ConditionallyGood);
        assert_eq!(evaluate_two_sided(&t, 1.3), Verdict::Bad);
    }

    #[test]
    fn cycle_verdict_counts_total_against_allowed_limits() {
        let store = RegisterStore::new();
        // all thresholds default to 0.0/0.0/0.0 -> everything reads as
        // exactly at the boundary; set one clearly bad upper-wall value.
        store.set_f32(Bank::Holding, holding::THRESHOLD_UPPER_WALL, 5.0);
        store.set_f32(Bank::Holding, holding::THRESHOLD_UPPER_WALL + 2, -0.2);
        store.set_f32(Bank::Holding, holding::THRESHOLD_UPPER_WALL + 4, -0.5);
        store.set_f32(Bank::Input, input::UPPER_WALL_TRIPLE, 10.0);
        store.set_f32(Bank::Input, input::UPPER_WALL_TRIPLE + 2, 10.0);
        store.set_f32(Bank::Input, input::UPPER_WALL_TRIPLE + 4, 10.0);
        store.set_word(Bank::Holding, holding::ALLOWED_BAD_COUNT, 0);
        let verdict = evaluate_cycle(&store, false);
        assert_eq!(verdict, Verdict::Bad);
        assert_eq!(store.get_word(Bank::Input, input::BAD_UPPER_WALL_GREATER), 1);
        assert_eq!(store.get_word(Bank::Input, input::SHIFT_COUNTERS), 1);
        assert_eq!(store.get_word(Bank::Input, input::SHIFT_COUNTERS + 3), 1);
    }
}
