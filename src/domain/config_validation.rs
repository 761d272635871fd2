//! Configuration validation and construction.
//!
//! Every builder checks its section before returning a value, so a
//! successful build is also a successful validation. Malformed values are
//! reported with the exact section and key rather than silently replaced by
//! defaults.

use crate::domain::backtest::BacktestConfig;
use crate::domain::backtest_rule::{Action, BacktestRule, PxiComparison, RuleCondition};
use crate::domain::error::PxiError;
use crate::domain::metric::{
    DefinitionError, HardRange, MetricDefinition, MetricId, Polarity, RangeTable,
};
use crate::domain::sanity::{DEFAULT_MIN_POINTS, DEFAULT_OUTLIER_THRESHOLD};
use crate::domain::scoring::{MissingMetricPolicy, ScoringConfig, StateThresholds};
use crate::domain::staleness::{StalenessPolicy, DEFAULT_STALE_AFTER_HOURS};
use crate::ports::config_port::ConfigPort;
use chrono::{Duration, NaiveDate};
use std::str::FromStr;

pub const DEFAULT_INITIAL_CAPITAL: f64 = 100_000.0;

const METRIC_PREFIX: &str = "metric.";
const RULE_PREFIX: &str = "rule.";

/// Validate every section present in `config`. `[backtest]` is only
/// checked when it exists.
pub fn validate_config(config: &dyn ConfigPort) -> Result<(), PxiError> {
    validate_metric_sections(config)?;
    build_scoring_config(config)?;
    build_definitions(config)?;
    build_range_table(config)?;
    build_staleness_policy(config)?;
    if has_section(config, "backtest") {
        build_backtest_config(config)?;
    }
    validate_regime(config)?;
    Ok(())
}

pub fn build_scoring_config(config: &dyn ConfigPort) -> Result<ScoringConfig, PxiError> {
    let defaults = ScoringConfig::default();

    let outlier_threshold: f64 =
        parse_opt(config, "scoring", "outlier_threshold")?.unwrap_or(DEFAULT_OUTLIER_THRESHOLD);
    if !(outlier_threshold > 0.0 && outlier_threshold.is_finite()) {
        return Err(PxiError::config_invalid(
            "scoring",
            "outlier_threshold",
            "outlier_threshold must be positive",
        ));
    }

    let min_points: usize =
        parse_opt(config, "scoring", "min_points")?.unwrap_or(DEFAULT_MIN_POINTS);
    if min_points < 2 {
        return Err(PxiError::config_invalid(
            "scoring",
            "min_points",
            "min_points must be at least 2",
        ));
    }

    let contribution_cap: f64 =
        parse_opt(config, "scoring", "contribution_cap")?.unwrap_or(defaults.contribution_cap);
    if !(contribution_cap > 0.0 && contribution_cap.is_finite()) {
        return Err(PxiError::config_invalid(
            "scoring",
            "contribution_cap",
            "contribution_cap must be positive",
        ));
    }

    let missing_policy: MissingMetricPolicy =
        parse_opt(config, "scoring", "missing_metric_policy")?.unwrap_or_default();
    let state_thresholds: StateThresholds =
        parse_opt(config, "scoring", "state_thresholds")?.unwrap_or_default();

    Ok(ScoringConfig {
        outlier_threshold,
        min_points,
        contribution_cap,
        missing_policy,
        state_thresholds,
    })
}

/// Core metrics are enabled unless `[metric.<id>] enabled = false`.
/// Optional metrics are enabled by the presence of their section.
pub fn build_definitions(config: &dyn ConfigPort) -> Result<Vec<MetricDefinition>, PxiError> {
    let mut definitions = Vec::new();

    for id in MetricId::ALL {
        let section = metric_section(id);
        let present = has_section(config, &section);
        let enabled = parse_bool_opt(config, &section, "enabled")?
            .unwrap_or(!id.is_optional() || present);
        if !enabled {
            continue;
        }

        let base = MetricDefinition::default_for(id);
        let lower: f64 = parse_opt(config, &section, "lower_bound")?.unwrap_or(base.lower_bound);
        let upper: f64 = parse_opt(config, &section, "upper_bound")?.unwrap_or(base.upper_bound);
        let weight: f64 = parse_opt(config, &section, "weight")?.unwrap_or(base.weight);
        let polarity: Polarity = parse_opt(config, &section, "polarity")?.unwrap_or(base.polarity);

        let def = MetricDefinition::new(id, lower, upper, weight, polarity).map_err(|e| {
            let key = match e {
                DefinitionError::Bounds(_) => "lower_bound",
                DefinitionError::Weight(_) => "weight",
            };
            PxiError::config_invalid(&section, key, e.to_string())
        })?;
        definitions.push(def);
    }

    if definitions.is_empty() {
        return Err(PxiError::config_invalid(
            "metric",
            "enabled",
            "at least one metric must be enabled",
        ));
    }
    Ok(definitions)
}

/// Core hard ranges, plus optional ranges when
/// `[validation] optional_ranges = true`, with per-metric
/// `range_min`/`range_max` overrides.
pub fn build_range_table(config: &dyn ConfigPort) -> Result<RangeTable, PxiError> {
    let mut table = RangeTable::core();
    if parse_bool_opt(config, "validation", "optional_ranges")?.unwrap_or(false) {
        table = table.with_optional();
    }

    for id in MetricId::ALL {
        let section = metric_section(id);
        let min: Option<f64> = parse_opt(config, &section, "range_min")?;
        let max: Option<f64> = parse_opt(config, &section, "range_max")?;
        if min.is_none() && max.is_none() {
            continue;
        }
        let base = id.hard_range();
        let range = HardRange {
            min: min.unwrap_or(base.min),
            max: max.unwrap_or(base.max),
        };
        if !(range.min < range.max) {
            return Err(PxiError::config_invalid(
                &section,
                "range_min",
                "range_min must be below range_max",
            ));
        }
        table.set(id, range);
    }
    Ok(table)
}

pub fn build_staleness_policy(config: &dyn ConfigPort) -> Result<StalenessPolicy, PxiError> {
    let default_after = positive_hours(config, "staleness", "default_hours")?
        .unwrap_or_else(|| Duration::hours(DEFAULT_STALE_AFTER_HOURS));
    let mut policy = StalenessPolicy::new(default_after);

    for id in MetricId::ALL {
        let section = metric_section(id);
        if let Some(after) = positive_hours(config, &section, "stale_after_hours")? {
            policy = policy.with_override(id, after);
        }
    }
    Ok(policy)
}

/// `[backtest] rules` names `[rule.<name>]` sections in evaluation order.
pub fn build_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, PxiError> {
    let start_date = parse_date(config, "start_date")?;
    let end_date = parse_date(config, "end_date")?;
    let initial_capital: f64 =
        parse_opt(config, "backtest", "initial_capital")?.unwrap_or(DEFAULT_INITIAL_CAPITAL);

    let names = config
        .get_string("backtest", "rules")
        .map(|s| split_list(&s))
        .filter(|v| !v.is_empty())
        .ok_or_else(|| missing("backtest", "rules"))?;

    let rules = names
        .iter()
        .map(|name| build_rule(config, name))
        .collect::<Result<Vec<_>, _>>()?;

    let sections = config.sections();
    let unlisted = sections
        .iter()
        .filter_map(|s| s.strip_prefix(RULE_PREFIX))
        .filter(|name| !names.iter().any(|n| n == name));
    for name in unlisted {
        tracing::warn!(rule = name, "rule section not listed in [backtest] rules");
    }

    let backtest = BacktestConfig {
        start_date,
        end_date,
        initial_capital,
        rules,
    };
    backtest.validate()?;
    Ok(backtest)
}

pub fn build_rule(config: &dyn ConfigPort, name: &str) -> Result<BacktestRule, PxiError> {
    let section = format!("{RULE_PREFIX}{name}");
    if !has_section(config, &section) {
        return Err(missing(&section, "action"));
    }

    let action: Action = parse_opt(config, &section, "action")?
        .ok_or_else(|| missing(&section, "action"))?;

    let pxi = PxiComparison {
        gt: parse_opt(config, &section, "pxi_gt")?,
        gte: parse_opt(config, &section, "pxi_gte")?,
        lt: parse_opt(config, &section, "pxi_lt")?,
        lte: parse_opt(config, &section, "pxi_lte")?,
    };
    let regimes = config
        .get_string(&section, "regimes")
        .map(|s| split_list(&s))
        .filter(|v| !v.is_empty());

    Ok(BacktestRule {
        name: name.to_string(),
        when: RuleCondition { pxi, regimes },
        action,
    })
}

fn validate_metric_sections(config: &dyn ConfigPort) -> Result<(), PxiError> {
    for section in config.sections() {
        let Some(key) = section.strip_prefix(METRIC_PREFIX) else {
            continue;
        };
        if key.parse::<MetricId>().is_err() {
            return Err(PxiError::config_invalid(
                &section,
                "metric",
                format!("unknown metric '{key}'"),
            ));
        }
    }
    Ok(())
}

fn validate_regime(config: &dyn ConfigPort) -> Result<(), PxiError> {
    match config.get_string("regime", "centroid_model") {
        Some(s) if s.trim().is_empty() => Err(PxiError::config_invalid(
            "regime",
            "centroid_model",
            "centroid_model must be a file path",
        )),
        _ => Ok(()),
    }
}

fn metric_section(id: MetricId) -> String {
    format!("{METRIC_PREFIX}{}", id.key())
}

fn has_section(config: &dyn ConfigPort, section: &str) -> bool {
    config.sections().iter().any(|s| s == section)
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn missing(section: &str, key: &str) -> PxiError {
    PxiError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

/// `None` when the key is absent or blank; an error when it does not parse.
fn parse_opt<T>(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<T>, PxiError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| PxiError::config_invalid(section, key, format!("'{}': {e}", raw.trim()))),
    }
}

fn parse_bool_opt(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<bool>, PxiError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(Some(true)),
            "false" | "no" | "off" | "0" => Ok(Some(false)),
            other => Err(PxiError::config_invalid(
                section,
                key,
                format!("'{other}' is not a boolean"),
            )),
        },
    }
}

fn positive_hours(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<Duration>, PxiError> {
    let Some(hours) = parse_opt::<i64>(config, section, key)? else {
        return Ok(None);
    };
    if hours <= 0 {
        return Err(PxiError::config_invalid(
            section,
            key,
            format!("{key} must be positive"),
        ));
    }
    Duration::try_hours(hours)
        .map(Some)
        .ok_or_else(|| PxiError::config_invalid(section, key, format!("{key} is out of range")))
}

fn parse_date(config: &dyn ConfigPort, key: &str) -> Result<NaiveDate, PxiError> {
    let raw = config
        .get_string("backtest", key)
        .ok_or_else(|| missing("backtest", key))?;
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        PxiError::config_invalid(
            "backtest",
            key,
            format!("invalid {key} format, expected YYYY-MM-DD"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    const BACKTEST: &str = r#"
[backtest]
start_date = 2020-01-01
end_date = 2024-12-31
initial_capital = 50000
rules = defensive, risk_on

[rule.risk_on]
pxi_gt = 65
action = long

[rule.defensive]
pxi_lt = 35
regimes = Stress, Caution
action = short
"#;

    fn invalid_key(err: PxiError) -> String {
        match err {
            PxiError::ConfigInvalid { key, .. } => key,
            other => panic!("expected ConfigInvalid, got {other}"),
        }
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = make_config("");
        assert!(validate_config(&config).is_ok());
        assert_eq!(build_scoring_config(&config).unwrap(), ScoringConfig::default());
        assert_eq!(build_definitions(&config).unwrap(), MetricDefinition::defaults());
        assert_eq!(build_range_table(&config).unwrap(), RangeTable::core());
        assert_eq!(
            build_staleness_policy(&config).unwrap(),
            StalenessPolicy::default()
        );
    }

    #[test]
    fn scoring_section_is_parsed() {
        let config = make_config(
            "[scoring]\noutlier_threshold = 2.5\nmin_points = 20\n\
             missing_metric_policy = abort\nstate_thresholds = asymmetric\n",
        );
        let s = build_scoring_config(&config).unwrap();
        assert_eq!(s.outlier_threshold, 2.5);
        assert_eq!(s.min_points, 20);
        assert_eq!(s.missing_policy, MissingMetricPolicy::Abort);
        assert_eq!(s.state_thresholds, StateThresholds::Asymmetric);
    }

    #[test]
    fn malformed_number_is_reported_not_defaulted() {
        let config = make_config("[scoring]\nmin_points = lots\n");
        assert_eq!(invalid_key(build_scoring_config(&config).unwrap_err()), "min_points");
    }

    #[test]
    fn unknown_policy_fails() {
        let config = make_config("[scoring]\nmissing_metric_policy = ignore\n");
        assert_eq!(
            invalid_key(validate_config(&config).unwrap_err()),
            "missing_metric_policy"
        );
    }

    #[test]
    fn min_points_below_two_fails() {
        let config = make_config("[scoring]\nmin_points = 1\n");
        assert_eq!(invalid_key(build_scoring_config(&config).unwrap_err()), "min_points");
    }

    #[test]
    fn metric_overrides_and_optional_metrics() {
        let config = make_config(
            "[metric.vix]\nweight = 2.0\n\n[metric.dxy]\nenabled = false\n\n\
             [metric.breakeven]\npolarity = negative\n",
        );
        let defs = build_definitions(&config).unwrap();
        let ids: Vec<MetricId> = defs.iter().map(|d| d.id).collect();
        assert!(!ids.contains(&MetricId::Dxy));
        assert!(ids.contains(&MetricId::Breakeven));
        assert!(!ids.contains(&MetricId::StlFsi));

        let vix = defs.iter().find(|d| d.id == MetricId::Vix).unwrap();
        assert_eq!(vix.weight, 2.0);
        let be = defs.iter().find(|d| d.id == MetricId::Breakeven).unwrap();
        assert_eq!(be.polarity, Polarity::Negative);
    }

    #[test]
    fn inverted_display_bounds_fail() {
        let config = make_config("[metric.vix]\nlower_bound = 50\nupper_bound = 10\n");
        let err = build_definitions(&config).unwrap_err();
        assert!(matches!(
            err,
            PxiError::ConfigInvalid { section, key, .. } if section == "metric.vix" && key == "lower_bound"
        ));
    }

    #[test]
    fn zero_weight_fails() {
        let config = make_config("[metric.vix]\nweight = 0\n");
        assert_eq!(invalid_key(build_definitions(&config).unwrap_err()), "weight");
    }

    #[test]
    fn unknown_metric_section_fails() {
        let config = make_config("[metric.gold]\nweight = 1\n");
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(
            err,
            PxiError::ConfigInvalid { section, .. } if section == "metric.gold"
        ));
    }

    #[test]
    fn disabling_every_metric_fails() {
        let content: String = MetricId::CORE
            .iter()
            .map(|id| format!("[metric.{}]\nenabled = no\n", id.key()))
            .collect();
        let config = make_config(&content);
        assert_eq!(invalid_key(build_definitions(&config).unwrap_err()), "enabled");
    }

    #[test]
    fn optional_ranges_and_overrides() {
        let config = make_config(
            "[validation]\noptional_ranges = true\n\n[metric.vix]\nrange_max = 90\n",
        );
        let table = build_range_table(&config).unwrap();
        assert_eq!(
            table.get(MetricId::Breakeven),
            Some(MetricId::Breakeven.hard_range())
        );
        let vix = table.get(MetricId::Vix).unwrap();
        assert_eq!(vix.max, 90.0);
        assert_eq!(vix.min, MetricId::Vix.hard_range().min);
    }

    #[test]
    fn optional_ranges_off_by_default() {
        let table = build_range_table(&make_config("")).unwrap();
        assert_eq!(table.get(MetricId::Breakeven), None);
    }

    #[test]
    fn staleness_overrides() {
        let config = make_config(
            "[staleness]\ndefault_hours = 48\n\n[metric.unemployment]\nstale_after_hours = 840\n",
        );
        let policy = build_staleness_policy(&config).unwrap();
        assert_eq!(policy.threshold_for(MetricId::Vix), Duration::hours(48));
        assert_eq!(
            policy.threshold_for(MetricId::Unemployment),
            Duration::hours(840)
        );
    }

    #[test]
    fn non_positive_staleness_fails() {
        let config = make_config("[staleness]\ndefault_hours = 0\n");
        assert_eq!(
            invalid_key(build_staleness_policy(&config).unwrap_err()),
            "default_hours"
        );
    }

    #[test]
    fn huge_staleness_hours_fail_without_panicking() {
        let config = make_config("[staleness]\ndefault_hours = 9000000000000000\n");
        assert_eq!(
            invalid_key(build_staleness_policy(&config).unwrap_err()),
            "default_hours"
        );

        let config = make_config("[metric.vix]\nstale_after_hours = 9000000000000000\n");
        let err = build_staleness_policy(&config).unwrap_err();
        assert!(matches!(
            err,
            PxiError::ConfigInvalid { ref section, ref key, .. }
                if section == "metric.vix" && key == "stale_after_hours"
        ));
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn backtest_rules_keep_declared_order() {
        let bt = build_backtest_config(&make_config(BACKTEST)).unwrap();
        assert_eq!(bt.initial_capital, 50_000.0);
        assert_eq!(bt.rules.len(), 2);
        assert_eq!(bt.rules[0].name, "defensive");
        assert_eq!(bt.rules[0].action, Action::Short);
        assert_eq!(bt.rules[0].when.pxi.lt, Some(35.0));
        assert_eq!(
            bt.rules[0].when.regimes,
            Some(vec!["Stress".to_string(), "Caution".to_string()])
        );
        assert_eq!(bt.rules[1].name, "risk_on");
        assert_eq!(bt.rules[1].when.pxi.gt, Some(65.0));
        assert_eq!(bt.rules[1].when.regimes, None);
    }

    #[test]
    fn backtest_section_validated_by_validate_config() {
        assert!(validate_config(&make_config(BACKTEST)).is_ok());
    }

    #[test]
    fn missing_end_date_fails() {
        let config = make_config("[backtest]\nstart_date = 2020-01-01\nrules = a\n");
        let err = build_backtest_config(&config).unwrap_err();
        assert!(matches!(err, PxiError::ConfigMissing { key, .. } if key == "end_date"));
    }

    #[test]
    fn invalid_date_format_fails() {
        let config = make_config("[backtest]\nstart_date = 01/01/2020\nend_date = 2024-12-31\n");
        assert_eq!(
            invalid_key(build_backtest_config(&config).unwrap_err()),
            "start_date"
        );
    }

    #[test]
    fn start_after_end_fails() {
        let config = BACKTEST.replace("start_date = 2020-01-01", "start_date = 2025-01-01");
        assert_eq!(
            invalid_key(build_backtest_config(&make_config(&config)).unwrap_err()),
            "start_date"
        );
    }

    #[test]
    fn missing_rules_key_fails() {
        let config = make_config("[backtest]\nstart_date = 2020-01-01\nend_date = 2024-12-31\n");
        let err = build_backtest_config(&config).unwrap_err();
        assert!(matches!(err, PxiError::ConfigMissing { key, .. } if key == "rules"));
    }

    #[test]
    fn listed_rule_without_section_fails() {
        let config = BACKTEST.replace("rules = defensive, risk_on", "rules = defensive, ghost");
        let err = build_backtest_config(&make_config(&config)).unwrap_err();
        assert!(matches!(
            err,
            PxiError::ConfigMissing { section, .. } if section == "rule.ghost"
        ));
    }

    #[test]
    fn unknown_action_fails() {
        let config = BACKTEST.replace("action = long", "action = buy");
        assert_eq!(
            invalid_key(build_backtest_config(&make_config(&config)).unwrap_err()),
            "action"
        );
    }

    #[test]
    fn unsatisfiable_rule_fails() {
        let config = BACKTEST.replace("pxi_gt = 65", "pxi_gt = 65\npxi_lt = 20");
        assert_eq!(
            invalid_key(build_backtest_config(&make_config(&config)).unwrap_err()),
            "pxi"
        );
    }

    #[test]
    fn non_finite_rule_bound_fails() {
        let config = BACKTEST.replace("pxi_gt = 65", "pxi_gt = NaN");
        let err = build_backtest_config(&make_config(&config)).unwrap_err();
        assert!(matches!(
            err,
            PxiError::ConfigInvalid { ref section, ref key, .. }
                if section == "rule.risk_on" && key == "pxi_gt"
        ));
    }
}
