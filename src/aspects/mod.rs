//! Aspect resolution: which makes, models and years are valid given the
//! values already fixed earlier in the make → model → year cascade.
//!
//! Live marketplace inventory is preferred; the curated catalog fills in
//! when the upstream is unreachable or says too little. Upstream failures
//! never reach the caller here: they are logged and answered from the
//! catalog, tagged `Source::Fallback`.

pub mod catalog;
pub mod extract;
mod session;

pub use extract::{AspectTally, ExtractionSource, Hits, TitleHints};
pub use session::{CascadeSession, Ticket};

use crate::cache::{Clock, TtlCache};
use crate::config::ResolverConfig;
use crate::ebay::{Constraints, SearchApi, SearchPage};
use crate::error::{UpstreamError, ValidationError};
use crate::models::{
    Aspect, AttributeSet, AttributeValue, Resolved, Source, normalize_part, require,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fallback answers are retried against live data sooner than the
/// regular aspect TTL.
const FALLBACK_TTL: Duration = Duration::from_secs(60);

/// Minimum number of distinct live values (with non-zero count) needed
/// before live data is trusted over the catalog. The defaults only reject
/// empty extractions; tune per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalPolicy {
    pub min_makes: usize,
    pub min_models: usize,
    pub min_years: usize,
}

impl Default for SignalPolicy {
    fn default() -> Self {
        Self {
            min_makes: 1,
            min_models: 1,
            min_years: 1,
        }
    }
}

impl SignalPolicy {
    fn minimum(&self, aspect: Aspect) -> usize {
        match aspect {
            Aspect::Make => self.min_makes,
            Aspect::Model => self.min_models,
            Aspect::Year => self.min_years,
        }
    }
}

/// Per-hit weight of each extraction signal. 1/1 reproduces a plain sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalWeights {
    pub structured: u32,
    pub title: u32,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            structured: 1,
            title: 1,
        }
    }
}

impl SignalWeights {
    pub fn score(&self, hits: Hits) -> u32 {
        hits.structured
            .saturating_mul(self.structured)
            .saturating_add(hits.title.saturating_mul(self.title))
    }
}

pub fn makes_key() -> String {
    "makes".to_string()
}

pub fn models_key(make: &str) -> String {
    format!("models:{}", normalize_part(make))
}

pub fn years_key(make: &str, model: &str) -> String {
    format!("years:{}|{}", normalize_part(make), normalize_part(model))
}

/// Prefix covering every years entry under `make`.
pub(crate) fn years_prefix(make: &str) -> String {
    format!("years:{}|", normalize_part(make))
}

pub struct AspectResolver {
    search: Arc<dyn SearchApi>,
    cache: Arc<TtlCache<Resolved>>,
    clock: Arc<dyn Clock>,
    config: ResolverConfig,
    ttl: Duration,
}

impl AspectResolver {
    pub fn new(
        search: Arc<dyn SearchApi>,
        cache: Arc<TtlCache<Resolved>>,
        clock: Arc<dyn Clock>,
        config: ResolverConfig,
        ttl: Duration,
    ) -> Self {
        Self {
            search,
            cache,
            clock,
            config,
            ttl,
        }
    }

    pub fn cache(&self) -> &Arc<TtlCache<Resolved>> {
        &self.cache
    }

    pub async fn resolve_makes(&self) -> Resolved {
        let key = makes_key();
        if let Some(hit) = self.cache.get(&key) {
            return hit;
        }
        let live = self
            .search
            .search("", &Constraints::none(), self.search.default_page_size())
            .await;
        let resolved = self.settle(Aspect::Make, None, live, catalog::fallback_makes());
        self.store(key, &resolved);
        resolved
    }

    pub async fn resolve_models(&self, make: &str) -> Result<Resolved, ValidationError> {
        require("make", make)?;
        let make = make.trim();
        let key = models_key(make);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let live = self
            .search
            .search(make, &Constraints::make(make), self.search.default_page_size())
            .await;
        let resolved = self.settle(Aspect::Model, Some(make), live, catalog::fallback_models(make));
        self.store(key, &resolved);
        Ok(resolved)
    }

    pub async fn resolve_years(&self, make: &str, model: &str) -> Result<Resolved, ValidationError> {
        require("make", make)?;
        require("model", model)?;
        let (make, model) = (make.trim(), model.trim());
        let key = years_key(make, model);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let query = format!("{make} {model}");
        let live = self
            .search
            .search(
                &query,
                &Constraints::make_model(make, model),
                self.search.default_page_size(),
            )
            .await;
        let current_year = self.clock.current_year();
        let fallback = catalog::fallback_years(current_year, self.config.year_floor);
        let resolved = self.settle(Aspect::Year, Some(make), live, fallback);
        self.store(key, &resolved);
        Ok(resolved)
    }

    /// Resolves every cascade level the selection allows in one call.
    pub async fn resolve_set(
        &self,
        make: Option<&str>,
        model: Option<&str>,
    ) -> Result<AttributeSet, ValidationError> {
        let make = make.filter(|m| !m.trim().is_empty());
        let model = model.filter(|m| !m.trim().is_empty());
        if model.is_some() && make.is_none() {
            return Err(ValidationError::new("make", "a model needs a make"));
        }
        let makes = self.resolve_makes().await;
        let mut source = makes.source;
        let models = match make {
            Some(make) => {
                let models = self.resolve_models(make).await?;
                source = source.combine(models.source);
                models.values
            }
            None => Vec::new(),
        };
        let years = match (make, model) {
            (Some(make), Some(model)) => {
                let years = self.resolve_years(make, model).await?;
                source = source.combine(years.source);
                years.values
            }
            _ => Vec::new(),
        };
        Ok(AttributeSet {
            makes: makes.values,
            models,
            years,
            source,
        })
    }

    /// Drops every cached aspect answer.
    pub fn refresh(&self) {
        self.cache.invalidate_all();
    }

    pub(crate) fn invalidate_make_scope(&self, make: &str) {
        let evicted =
            self.cache.invalidate(&models_key(make)) as usize + self.cache.invalidate_prefix(&years_prefix(make));
        debug!(target = "motorval.resolver", make = make, evicted, "invalidated make scope");
    }

    pub(crate) fn invalidate_model_scope(&self, make: &str, model: &str) {
        self.cache.invalidate(&years_key(make, model));
    }

    fn store(&self, key: String, resolved: &Resolved) {
        let ttl = match resolved.source {
            Source::Fallback => FALLBACK_TTL.min(self.ttl),
            Source::Live | Source::Merged => self.ttl,
        };
        self.cache.set(key, resolved.clone(), ttl);
    }

    fn settle(
        &self,
        aspect: Aspect,
        make: Option<&str>,
        live: Result<SearchPage, UpstreamError>,
        fallback: Vec<AttributeValue>,
    ) -> Resolved {
        let page = match live {
            Ok(page) => page,
            Err(err) => {
                warn!(
                    target = "motorval.resolver",
                    aspect = ?aspect,
                    make = make.unwrap_or(""),
                    error = %err,
                    "upstream failed; serving fallback catalog"
                );
                return self.fallback(aspect, fallback);
            }
        };

        let live_values = self.live_values(aspect, make, &page);
        let signal = live_values.iter().filter(|v| v.count > 0).count();
        if signal < self.config.policy.minimum(aspect) {
            debug!(
                target = "motorval.resolver",
                aspect = ?aspect,
                make = make.unwrap_or(""),
                signal,
                items = page.items.len(),
                "insufficient live signal; serving fallback catalog"
            );
            return self.fallback(aspect, fallback);
        }

        // synthesized years are not curated data, so they never pad a live answer
        let (values, source) = if aspect == Aspect::Year || fallback.is_empty() {
            (live_values, Source::Live)
        } else {
            (merge(live_values, fallback), Source::Merged)
        };
        Resolved {
            values: finalize(aspect, values),
            source,
        }
    }

    fn fallback(&self, aspect: Aspect, fallback: Vec<AttributeValue>) -> Resolved {
        crate::metrics::fallback_served(match aspect {
            Aspect::Make => "make",
            Aspect::Model => "model",
            Aspect::Year => "year",
        });
        Resolved {
            values: finalize(aspect, fallback),
            source: Source::Fallback,
        }
    }

    fn live_values(&self, aspect: Aspect, make: Option<&str>, page: &SearchPage) -> Vec<AttributeValue> {
        let hints = TitleHints {
            make,
            current_year: self.clock.current_year(),
        };
        let mut tally = extract::extract(&page.items, aspect, &hints);
        tally.absorb(extract::extract_distributions(&page.distributions, aspect));
        let parent = match aspect {
            Aspect::Model => make.map(|m| catalog::canonical_make(m).unwrap_or(m)),
            Aspect::Make | Aspect::Year => None,
        };
        tally
            .entries()
            .map(|entry| AttributeValue::new(&entry.display, self.config.weights.score(entry.hits), parent))
            .collect()
    }
}

/// Union by case-normalized value; live counts replace fallback counts.
pub fn merge(live: Vec<AttributeValue>, fallback: Vec<AttributeValue>) -> Vec<AttributeValue> {
    let mut by_value: HashMap<String, AttributeValue> = HashMap::new();
    for value in fallback {
        by_value.insert(normalize_part(&value.value), value);
    }
    for value in live {
        let key = normalize_part(&value.value);
        match by_value.get_mut(&key) {
            Some(existing) => {
                existing.count = value.count;
                if existing.parent.is_none() {
                    existing.parent = value.parent;
                }
            }
            None => {
                by_value.insert(key, value);
            }
        }
    }
    by_value.into_values().collect()
}

/// Drops zero-count values and applies the display order: names ascending
/// for makes and models, years newest first.
pub fn finalize(aspect: Aspect, mut values: Vec<AttributeValue>) -> Vec<AttributeValue> {
    values.retain(|v| v.count > 0);
    match aspect {
        Aspect::Year => values.sort_by(|a, b| {
            let (ya, yb) = (a.value.parse::<i32>().ok(), b.value.parse::<i32>().ok());
            yb.cmp(&ya).then_with(|| a.value.cmp(&b.value))
        }),
        Aspect::Make | Aspect::Model => values.sort_by(|a, b| by_display_name(a, b)),
    }
    values
}

fn by_display_name(a: &AttributeValue, b: &AttributeValue) -> Ordering {
    a.display_name
        .to_lowercase()
        .cmp(&b.display_name.to_lowercase())
        .then_with(|| a.display_name.cmp(&b.display_name))
}
