use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::error::EngineError;
use crate::fetch::{FetchSpec, Payload};
use crate::signals::{BlockStatus, Days, PageState, PerMonth, Signal};

const EDIT_COUNT_MULTIPLIER: f64 = 1.25;
const BLOCK_COUNT_MULTIPLIER: f64 = 1.4;
const ACCOUNT_AGE_MULTIPLIER: f64 = 1.25;
const ARTICLES_CREATED_MULTIPLIER: f64 = 1.4;
const ACTIVITY_MULTIPLIER: f64 = 0.9;

const MILLISECONDS_IN_DAY: f64 = 1000.0 * 60.0 * 60.0 * 24.0;

/// Total edit count. Log-shaped reward above a hard floor of 350 edits;
/// below the floor the signal is disqualifying.
pub struct EditCount;

impl Signal for EditCount {
    type Value = u64;

    const NAME: &'static str = "Edit count";

    fn plan(&self, identity: &str) -> FetchSpec {
        FetchSpec::Single(vec![
            ("action".into(), "query".into()),
            ("list".into(), "users".into()),
            ("usprop".into(), "editcount".into()),
            ("ususers".into(), format!("User:{identity}")),
        ])
    }

    fn reduce(&self, payload: Payload) -> Result<u64, EngineError> {
        let data = expect_json(payload, Self::NAME)?;
        first_user(&data, Self::NAME)?
            .get("editcount")
            .and_then(Value::as_u64)
            .ok_or_else(|| reduce_err(Self::NAME, "missing editcount"))
    }

    fn score(&self, edits: &u64) -> f64 {
        if *edits < 350 {
            EDIT_COUNT_MULTIPLIER * -200.0
        } else {
            EDIT_COUNT_MULTIPLIER * (71.513 * (*edits as f64).ln() - 621.0874)
        }
    }

    fn format(&self, edits: &u64) -> String {
        with_thousands(&edits.to_string())
    }
}

/// Current and historical block standing. Two requests joined: the live
/// block status and the block log for the user's page.
pub struct Blocks;

impl Signal for Blocks {
    type Value = BlockStatus;

    const NAME: &'static str = "Blocks";

    fn plan(&self, identity: &str) -> FetchSpec {
        FetchSpec::Paired(
            vec![
                ("action".into(), "query".into()),
                ("list".into(), "users".into()),
                ("ususers".into(), identity.into()),
                ("usprop".into(), "blockinfo".into()),
            ],
            vec![
                ("action".into(), "query".into()),
                ("list".into(), "logevents".into()),
                ("letitle".into(), format!("User:{identity}")),
                ("leaction".into(), "block/block".into()),
            ],
        )
    }

    fn reduce(&self, payload: Payload) -> Result<BlockStatus, EngineError> {
        let (status, log) = expect_pair(payload, Self::NAME)?;
        let user = first_user(&status, Self::NAME)?;

        if let Some(expiry) = user.get("blockexpiry") {
            let expiry = expiry
                .as_str()
                .ok_or_else(|| reduce_err(Self::NAME, "blockexpiry is not a string"))?;
            return Ok(if expiry == "infinity" {
                BlockStatus::Indefinite
            } else {
                BlockStatus::Temporary(expiry.to_string())
            });
        }

        let events = log
            .get("query")
            .and_then(|q| q.get("logevents"))
            .and_then(Value::as_array)
            .ok_or_else(|| reduce_err(Self::NAME, "missing query.logevents"))?;
        if events.is_empty() {
            return Ok(BlockStatus::Clean);
        }

        // Log events arrive newest first.
        let last = events[0]
            .get("timestamp")
            .and_then(Value::as_str)
            .ok_or_else(|| reduce_err(Self::NAME, "log event has no timestamp"))?;
        let last = parse_timestamp(last)
            .ok_or_else(|| reduce_err(Self::NAME, "unparseable log timestamp"))?;
        Ok(BlockStatus::Past {
            count: events.len() as u64,
            days_since_last: days_since(last),
        })
    }

    fn score(&self, status: &BlockStatus) -> f64 {
        match status {
            BlockStatus::Indefinite => -500.0,
            BlockStatus::Temporary(_) => -100.0,
            BlockStatus::Clean => BLOCK_COUNT_MULTIPLIER * 100.0,
            BlockStatus::Past {
                count,
                days_since_last,
            } => {
                let mut score = 0.1977 * days_since_last - 92.3255;
                score -= 10.0 * *count as f64;
                if score > 100.0 {
                    score = 100.0;
                }
                BLOCK_COUNT_MULTIPLIER * score
            }
        }
    }

    fn format(&self, status: &BlockStatus) -> String {
        match status {
            BlockStatus::Indefinite => "indefinitely blocked".into(),
            BlockStatus::Temporary(expiry) => format!("currently blocked for {expiry}"),
            BlockStatus::Clean => "never blocked".into(),
            BlockStatus::Past {
                count,
                days_since_last,
            } => {
                let plural = if *count == 1 { "" } else { "s" };
                format!(
                    "{count} block{plural} (last one was {} days ago)",
                    with_thousands(&format!("{days_since_last:.1}"))
                )
            }
        }
    }
}

/// Days since registration. Accounts younger than 43 days are disqualified;
/// older accounts earn a log-shaped reward.
pub struct AccountAge;

impl Signal for AccountAge {
    type Value = Days;

    const NAME: &'static str = "Account age";

    fn plan(&self, identity: &str) -> FetchSpec {
        FetchSpec::Single(vec![
            ("action".into(), "query".into()),
            ("list".into(), "users".into()),
            ("ususers".into(), identity.into()),
            ("usprop".into(), "registration".into()),
        ])
    }

    fn reduce(&self, payload: Payload) -> Result<Days, EngineError> {
        let data = expect_json(payload, Self::NAME)?;
        let registration = first_user(&data, Self::NAME)?
            .get("registration")
            .and_then(Value::as_str)
            .ok_or_else(|| reduce_err(Self::NAME, "missing registration date"))?;
        let registration = parse_timestamp(registration)
            .ok_or_else(|| reduce_err(Self::NAME, "unparseable registration date"))?;
        Ok(Days(days_since(registration)))
    }

    fn score(&self, age: &Days) -> f64 {
        if age.0 < 43.0 {
            ACCOUNT_AGE_MULTIPLIER * -200.0
        } else {
            ACCOUNT_AGE_MULTIPLIER * (91.482 * age.0.ln() - 544.85)
        }
    }

    fn format(&self, age: &Days) -> String {
        format!(
            "{} days ({:.2} years)",
            with_thousands(&format!("{:.1}", age.0)),
            age.0 / 365.0
        )
    }
}

/// Whether the account's user page exists, redirects, or is missing.
pub struct UserPage;

impl Signal for UserPage {
    type Value = PageState;

    const NAME: &'static str = "User page";

    fn plan(&self, identity: &str) -> FetchSpec {
        FetchSpec::Single(vec![
            ("action".into(), "query".into()),
            ("prop".into(), "revisions".into()),
            ("rvprop".into(), "content".into()),
            ("titles".into(), format!("User:{identity}")),
        ])
    }

    fn reduce(&self, payload: Payload) -> Result<PageState, EngineError> {
        let data = expect_json(payload, Self::NAME)?;
        let pages = data
            .get("query")
            .and_then(|q| q.get("pages"))
            .and_then(Value::as_object)
            .ok_or_else(|| reduce_err(Self::NAME, "missing query.pages"))?;

        // Missing pages come back under the sentinel page id "-1".
        if pages.contains_key("-1") {
            return Ok(PageState::Missing);
        }

        let page = pages
            .values()
            .next()
            .ok_or_else(|| reduce_err(Self::NAME, "empty pages map"))?;
        let text = page
            .get("revisions")
            .and_then(|r| r.get(0))
            .and_then(|r| r.get("*"))
            .and_then(Value::as_str)
            .ok_or_else(|| reduce_err(Self::NAME, "missing revision content"))?;
        Ok(if text.starts_with("#REDIRECT") {
            PageState::Redirect
        } else {
            PageState::Exists
        })
    }

    fn score(&self, state: &PageState) -> f64 {
        match state {
            PageState::Missing => -50.0,
            PageState::Redirect => -10.0,
            PageState::Exists => 10.0,
        }
    }

    fn format(&self, state: &PageState) -> String {
        match state {
            PageState::Missing => "missing",
            PageState::Redirect => "redirect",
            PageState::Exists => "exists",
        }
        .into()
    }
}

/// Granted user groups. Elevated groups score from a fixed table capped at
/// 100; adminship dominates everything else.
pub struct UserRights;

/// Groups every account effectively has; they carry no information.
const UNIMPORTANT_GROUPS: [&str; 3] = ["*", "user", "autoconfirmed"];

const GROUP_SCORES: [(&str, f64); 8] = [
    ("abusefilter", 25.0),
    ("accountcreator", 10.0),
    ("autoreviewer", 20.0),
    ("checkuser", 25.0),
    ("filemover", 15.0),
    ("reviewer", 5.0),
    ("rollbacker", 5.0),
    ("templateeditor", 20.0),
];

impl Signal for UserRights {
    type Value = Vec<String>;

    const NAME: &'static str = "User rights";

    fn plan(&self, identity: &str) -> FetchSpec {
        FetchSpec::Single(vec![
            ("action".into(), "query".into()),
            ("list".into(), "users".into()),
            ("usprop".into(), "groups".into()),
            ("ususers".into(), identity.into()),
        ])
    }

    fn reduce(&self, payload: Payload) -> Result<Vec<String>, EngineError> {
        let data = expect_json(payload, Self::NAME)?;
        let groups = first_user(&data, Self::NAME)?
            .get("groups")
            .and_then(Value::as_array)
            .ok_or_else(|| reduce_err(Self::NAME, "missing groups"))?;
        groups
            .iter()
            .map(|g| {
                g.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| reduce_err(Self::NAME, "group name is not a string"))
            })
            .filter(|g| match g {
                Ok(name) => !UNIMPORTANT_GROUPS.contains(&name.as_str()),
                Err(_) => true,
            })
            .collect()
    }

    fn score(&self, groups: &Vec<String>) -> f64 {
        let mut score = 0.0;
        for group in groups {
            if group == "sysop" || group == "bureaucrat" {
                return 500.0;
            }
            if let Some((_, points)) = GROUP_SCORES.iter().find(|(name, _)| name == group) {
                score += points;
            }
        }
        score.min(100.0)
    }

    fn format(&self, groups: &Vec<String>) -> String {
        if groups.is_empty() {
            "none".into()
        } else {
            join_natural(groups)
        }
    }
}

/// Count of article-space pages created, walked across the full
/// contribution history.
pub struct PagesCreated {
    pub limit: u32,
}

impl Signal for PagesCreated {
    type Value = u64;

    const NAME: &'static str = "Pages created";

    fn plan(&self, identity: &str) -> FetchSpec {
        FetchSpec::Paginated {
            query: vec![
                ("action".into(), "query".into()),
                ("list".into(), "usercontribs".into()),
                ("ucuser".into(), identity.into()),
                ("uclimit".into(), self.limit.to_string()),
                ("ucdir".into(), "older".into()),
                ("ucprop".into(), "title".into()),
                ("ucshow".into(), "new".into()),
                ("ucnamespace".into(), "0".into()),
            ],
            list: "usercontribs",
        }
    }

    fn reduce(&self, payload: Payload) -> Result<u64, EngineError> {
        expect_count(payload, Self::NAME)
    }

    fn score(&self, created: &u64) -> f64 {
        let raw = (36.07161 * (*created as f64).ln() - 68.8246).max(-100.0);
        ARTICLES_CREATED_MULTIPLIER * raw
    }

    fn format(&self, created: &u64) -> String {
        format!("{created} article-space pages created")
    }
}

/// Average monthly edit rate over the trailing year.
pub struct Activity {
    pub limit: u32,
}

impl Signal for Activity {
    type Value = PerMonth;

    const NAME: &'static str = "Activity";

    fn plan(&self, identity: &str) -> FetchSpec {
        let a_year_ago = (Utc::now() - chrono::Duration::days(365))
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        FetchSpec::Paginated {
            query: vec![
                ("action".into(), "query".into()),
                ("list".into(), "usercontribs".into()),
                ("ucuser".into(), identity.into()),
                ("uclimit".into(), self.limit.to_string()),
                ("ucprop".into(), "timestamp".into()),
                ("ucend".into(), a_year_ago),
            ],
            list: "usercontribs",
        }
    }

    fn reduce(&self, payload: Payload) -> Result<PerMonth, EngineError> {
        let edits_over_past_year = expect_count(payload, Self::NAME)?;
        Ok(PerMonth(edits_over_past_year as f64 / 12.0))
    }

    fn score(&self, rate: &PerMonth) -> f64 {
        let raw = (30.41375 * rate.0.ln() - 138.48563).max(-50.0);
        ACTIVITY_MULTIPLIER * raw
    }

    fn format(&self, rate: &PerMonth) -> String {
        format!(
            "{} edits per month, on average (over the last year)",
            with_thousands(&format!("{:.1}", rate.0))
        )
    }
}

// --- Payload helpers ---

fn expect_json(payload: Payload, metric: &'static str) -> Result<Value, EngineError> {
    match payload {
        Payload::Json(data) => Ok(data),
        other => Err(reduce_err(metric, &format!("expected single payload, got {other:?}"))),
    }
}

fn expect_pair(payload: Payload, metric: &'static str) -> Result<(Value, Value), EngineError> {
    match payload {
        Payload::Pair(a, b) => Ok((a, b)),
        other => Err(reduce_err(metric, &format!("expected paired payload, got {other:?}"))),
    }
}

fn expect_count(payload: Payload, metric: &'static str) -> Result<u64, EngineError> {
    match payload {
        Payload::Count(n) => Ok(n),
        other => Err(reduce_err(metric, &format!("expected item count, got {other:?}"))),
    }
}

fn first_user<'a>(data: &'a Value, metric: &'static str) -> Result<&'a Value, EngineError> {
    data.get("query")
        .and_then(|q| q.get("users"))
        .and_then(|u| u.get(0))
        .ok_or_else(|| reduce_err(metric, "missing query.users[0]"))
}

fn reduce_err(metric: &'static str, detail: &str) -> EngineError {
    EngineError::Reduce {
        metric,
        detail: detail.to_string(),
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn days_since(then: DateTime<Utc>) -> f64 {
    (Utc::now() - then).num_milliseconds() as f64 / MILLISECONDS_IN_DAY
}

// --- Formatting helpers ---

/// Insert thousands separators into the integer part of a rendered number.
pub(crate) fn with_thousands(value: &str) -> String {
    let (int_part, frac_part) = match value.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (value, None),
    };
    let (sign, digits) = match int_part.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", int_part),
    };
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    match frac_part {
        Some(frac) => format!("{sign}{grouped}.{frac}"),
        None => format!("{sign}{grouped}"),
    }
}

/// English list join: "a", "a and b", "a, b, and c".
fn join_natural(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [only] => only.clone(),
        [first, second] => format!("{first} and {second}"),
        [head @ .., last] => format!("{}, and {last}", head.join(", ")),
    }
}
