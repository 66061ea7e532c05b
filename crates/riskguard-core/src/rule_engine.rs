//! Hot-reloadable policy rules evaluated after the detectors.
//!
//! ## Evaluation Order
//!
//! 1. Enabled rules sorted by priority, highest first; equal priorities keep
//!    their load order
//! 2. Rules whose risk type a detector already reported are skipped
//! 3. A matching rule whose action maps to Reject ends evaluation immediately
//! 4. Otherwise the highest-scoring match decides the explicit result
//!
//! The active [`RuleSet`] is swapped wholesale on load; evaluators hold an
//! `Arc` snapshot so a reload never tears a read.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::RuleError;
use crate::model::{CheckContext, ResultType, RiskItem, RiskType};

/// Default verbatim-repeat count for `context_analysis` rules.
pub const DEFAULT_REPEAT_THRESHOLD: usize = 2;

/// Extra-data key carrying the caller-supplied user reputation.
pub const USER_REPUTATION_KEY: &str = "user_reputation";

/// Maps a rule action key onto a verdict band.
pub fn action_result(action: &str) -> ResultType {
    match action {
        "block" => ResultType::Reject,
        "review" => ResultType::Review,
        "mark" => ResultType::Warning,
        _ => ResultType::Pass,
    }
}

/// One policy rule as defined in the rule document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
    /// Higher runs first.
    #[serde(default)]
    pub priority: i32,
    /// Action key: `block`, `review`, `mark` or anything else for pass.
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub score: f32,
    /// Matching strategy; defaults to the rule id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

impl Rule {
    /// Returns the matching strategy name.
    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or(&self.id)
    }

    /// Suggestion text used when this rule forces a verdict.
    pub fn suggestion(&self) -> String {
        format!(
            "Content violated rule \"{}\": {}",
            self.name, self.description
        )
    }

    fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    fn config_strings(&self, key: &str) -> Result<Vec<String>, RuleError> {
        match self.config.get(key) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str().map(str::to_string).ok_or_else(|| RuleError::InvalidConfig {
                        rule: self.id.clone(),
                        message: format!("`{}` must contain only strings", key),
                    })
                })
                .collect(),
            Some(_) => Err(RuleError::InvalidConfig {
                rule: self.id.clone(),
                message: format!("`{}` must be an array", key),
            }),
        }
    }

    fn config_number(&self, key: &str) -> Option<f64> {
        self.config.get(key).and_then(Value::as_f64)
    }
}

/// Display metadata for an action key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Rule document as stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleDocument {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub actions: HashMap<String, ActionInfo>,
    #[serde(default)]
    pub categories: HashMap<String, String>,
}

/// Compiled matching strategy for one rule kind.
trait RuleMatcher: Send + Sync {
    /// Risk type this rule reports.
    fn risk_type(&self) -> RiskType;

    /// Returns match details if the rule fires for `ctx`.
    fn matches(&self, ctx: &CheckContext) -> Option<Vec<(String, String)>>;
}

/// `sensitive_words`: category-typed keyword list.
struct KeywordMatcher {
    risk_type: RiskType,
    keywords: Vec<String>,
}

impl RuleMatcher for KeywordMatcher {
    fn risk_type(&self) -> RiskType {
        self.risk_type
    }

    fn matches(&self, ctx: &CheckContext) -> Option<Vec<(String, String)>> {
        self.keywords
            .iter()
            .find(|k| ctx.content.contains(k.as_str()))
            .map(|k| vec![("keyword".to_string(), k.clone())])
    }
}

/// `spam_detection`: regex patterns.
struct PatternMatcher {
    patterns: Vec<Regex>,
}

impl RuleMatcher for PatternMatcher {
    fn risk_type(&self) -> RiskType {
        RiskType::Spam
    }

    fn matches(&self, ctx: &CheckContext) -> Option<Vec<(String, String)>> {
        self.patterns
            .iter()
            .find(|p| p.is_match(&ctx.content))
            .map(|p| vec![("pattern".to_string(), p.as_str().to_string())])
    }
}

/// `context_analysis`: verbatim repeats by the same author.
struct RepeatMatcher {
    threshold: usize,
}

impl RuleMatcher for RepeatMatcher {
    fn risk_type(&self) -> RiskType {
        RiskType::ContextViolation
    }

    fn matches(&self, ctx: &CheckContext) -> Option<Vec<(String, String)>> {
        if !ctx.has_context() {
            return None;
        }
        let repeats = ctx
            .context_items
            .iter()
            .filter(|i| i.user_id == ctx.user_id && i.content == ctx.content)
            .count();
        (repeats >= self.threshold)
            .then(|| vec![("repeat_count".to_string(), repeats.to_string())])
    }
}

/// `user_reputation`: block list and minimum reputation.
struct ReputationMatcher {
    min_score: Option<f64>,
    blocked_users: HashSet<String>,
}

impl RuleMatcher for ReputationMatcher {
    fn risk_type(&self) -> RiskType {
        RiskType::SuspiciousBehavior
    }

    fn matches(&self, ctx: &CheckContext) -> Option<Vec<(String, String)>> {
        if !ctx.user_id.is_empty() && self.blocked_users.contains(&ctx.user_id) {
            return Some(vec![("blocked_user".to_string(), ctx.user_id.clone())]);
        }

        let min = self.min_score?;
        let reputation: f64 = ctx.extra_data.get(USER_REPUTATION_KEY)?.trim().parse().ok()?;
        (reputation < min).then(|| vec![("reputation".to_string(), reputation.to_string())])
    }
}

/// Builds the matcher for a rule. Unknown kinds yield `None` and never match.
fn compile(rule: &Rule) -> Result<Option<Box<dyn RuleMatcher>>, RuleError> {
    let matcher: Box<dyn RuleMatcher> = match rule.kind() {
        "sensitive_words" => {
            let Some(category) = rule.config_str("category") else {
                return Ok(None);
            };
            Box::new(KeywordMatcher {
                risk_type: RiskType::from_category(category),
                keywords: rule.config_strings("keywords")?,
            })
        }
        "spam_detection" => {
            let patterns = rule
                .config_strings("patterns")?
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| RuleError::InvalidConfig {
                        rule: rule.id.clone(),
                        message: e.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Box::new(PatternMatcher { patterns })
        }
        "context_analysis" => Box::new(RepeatMatcher {
            threshold: rule
                .config_number("repeat_threshold")
                .map(|n| n.max(1.0) as usize)
                .unwrap_or(DEFAULT_REPEAT_THRESHOLD),
        }),
        "user_reputation" => Box::new(ReputationMatcher {
            min_score: rule.config_number("min_score"),
            blocked_users: rule.config_strings("blocked_users")?.into_iter().collect(),
        }),
        _ => return Ok(None),
    };
    Ok(Some(matcher))
}

/// An immutable, versioned rule catalog.
#[derive(Serialize)]
pub struct RuleSet {
    pub version: u64,
    pub loaded_at: DateTime<Utc>,
    /// Rules in load order.
    pub rules: Vec<Rule>,
    pub actions: HashMap<String, ActionInfo>,
    pub categories: HashMap<String, String>,
    /// Indices of enabled rules in evaluation order.
    #[serde(skip)]
    order: Vec<usize>,
    #[serde(skip)]
    matchers: Vec<Option<Box<dyn RuleMatcher>>>,
}

impl RuleSet {
    fn empty() -> Self {
        Self {
            version: 1,
            loaded_at: Utc::now(),
            rules: Vec::new(),
            actions: HashMap::new(),
            categories: HashMap::new(),
            order: Vec::new(),
            matchers: Vec::new(),
        }
    }

    fn build(doc: RuleDocument, version: u64) -> Result<Self, RuleError> {
        let mut seen = HashSet::new();
        for rule in &doc.rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(RuleError::DuplicateRule(rule.id.clone()));
            }
        }

        let matchers = doc
            .rules
            .iter()
            .map(compile)
            .collect::<Result<Vec<_>, _>>()?;

        let mut order: Vec<usize> = (0..doc.rules.len())
            .filter(|&i| doc.rules[i].enabled)
            .collect();
        // Stable: equal priorities keep load order
        order.sort_by_key(|&i| std::cmp::Reverse(doc.rules[i].priority));

        Ok(Self {
            version,
            loaded_at: Utc::now(),
            rules: doc.rules,
            actions: doc.actions,
            categories: doc.categories,
            order,
            matchers,
        })
    }

    /// Looks up a rule by id.
    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Enabled rules in evaluation order.
    pub fn evaluation_order(&self) -> impl Iterator<Item = &Rule> {
        self.order.iter().map(|&i| &self.rules[i])
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluates the rules against a context and the detector findings.
    pub fn evaluate(&self, ctx: &CheckContext, existing: &[RiskItem]) -> RuleEvaluation {
        let found: HashSet<RiskType> = existing.iter().map(|r| r.risk_type).collect();
        let mut evaluation = RuleEvaluation::default();
        let mut best: Option<(f32, ResultType)> = None;

        for &i in &self.order {
            let rule = &self.rules[i];
            let Some(matcher) = &self.matchers[i] else {
                continue;
            };
            if found.contains(&matcher.risk_type()) {
                continue;
            }
            let Some(details) = matcher.matches(ctx) else {
                continue;
            };

            let description = if rule.description.is_empty() {
                rule.name.clone()
            } else {
                rule.description.clone()
            };
            let mut item = RiskItem::new(matcher.risk_type(), rule.score, description)
                .with_detail("rule_id", rule.id.clone());
            item.details.extend(details);
            evaluation.risks.push(item);

            let result = action_result(&rule.action);
            if result == ResultType::Reject {
                evaluation.result = ResultType::Reject;
                evaluation.score = rule.score;
                evaluation.explicit = true;
                evaluation.suggestion = rule.suggestion();
                evaluation.rule_id = Some(rule.id.clone());
                return evaluation;
            }

            if rule.score > best.map_or(0.0, |(score, _)| score) {
                best = Some((rule.score, result));
                evaluation.rule_id = Some(rule.id.clone());
            }
        }

        if let Some((score, result)) = best {
            evaluation.score = score;
            evaluation.result = result;
            evaluation.explicit = true;
        }

        evaluation
    }
}

impl std::fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleSet")
            .field("version", &self.version)
            .field("rules", &self.rules.len())
            .field("enabled", &self.order.len())
            .finish()
    }
}

/// Outcome of evaluating a rule set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleEvaluation {
    pub result: ResultType,
    pub score: f32,
    /// Risk items produced by matching rules.
    pub risks: Vec<RiskItem>,
    pub suggestion: String,
    /// True if a rule decided the verdict directly.
    pub explicit: bool,
    /// Rule that decided the verdict, if any.
    pub rule_id: Option<String>,
}

/// Shared, reloadable rule catalog.
#[derive(Debug, Default)]
pub struct RuleEngine {
    active: RwLock<Option<Arc<RuleSet>>>,
    source: RwLock<Option<PathBuf>>,
}

impl RuleEngine {
    /// Creates an engine with no rule set; `evaluate` fails until one is loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine with an empty rule set.
    pub fn empty() -> Self {
        Self {
            active: RwLock::new(Some(Arc::new(RuleSet::empty()))),
            source: RwLock::new(None),
        }
    }

    /// Creates an engine from a rule file. Used at startup, where failure is fatal.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, RuleError> {
        let engine = Self::new();
        engine.load_file(path)?;
        Ok(engine)
    }

    /// Loads a rule file and remembers it for [`reload`](Self::reload).
    pub fn load_file(&self, path: impl Into<PathBuf>) -> Result<Arc<RuleSet>, RuleError> {
        let path = path.into();
        let doc = read_document(&path)?;
        let set = self.install(doc)?;
        info!(
            path = %path.display(),
            rules = set.len(),
            version = set.version,
            "Loaded rules"
        );
        *self.source.write() = Some(path);
        Ok(set)
    }

    /// Loads a rule document from a JSON string.
    pub fn load_str(&self, json: &str) -> Result<Arc<RuleSet>, RuleError> {
        self.install(serde_json::from_str(json)?)
    }

    /// Re-reads the configured rule file. On failure the active set is kept.
    pub fn reload(&self) -> Result<Arc<RuleSet>, RuleError> {
        let path = self.source.read().clone().ok_or(RuleError::NoSource)?;
        self.load_file(path)
    }

    /// Builds and atomically installs a new rule set.
    pub fn install(&self, doc: RuleDocument) -> Result<Arc<RuleSet>, RuleError> {
        let mut active = self.active.write();
        let version = active.as_ref().map_or(1, |s| s.version + 1);
        let set = Arc::new(RuleSet::build(doc, version)?);
        *active = Some(Arc::clone(&set));
        Ok(set)
    }

    /// Returns the active rule set.
    pub fn snapshot(&self) -> Option<Arc<RuleSet>> {
        self.active.read().clone()
    }

    /// Returns the configured rule file, if any.
    pub fn source(&self) -> Option<PathBuf> {
        self.source.read().clone()
    }

    /// Evaluates the active rule set.
    pub fn evaluate(
        &self,
        ctx: &CheckContext,
        existing: &[RiskItem],
    ) -> Result<RuleEvaluation, RuleError> {
        let set = self.snapshot().ok_or(RuleError::NotInitialized)?;
        Ok(set.evaluate(ctx, existing))
    }
}

fn read_document(path: &Path) -> Result<RuleDocument, RuleError> {
    let data = std::fs::read_to_string(path).map_err(|source| RuleError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&data)?)
}
