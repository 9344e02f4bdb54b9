use crate::aspects::AspectResolver;
use crate::error::ValidationError;
use crate::models::{Resolved, normalize_part, require};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Selection snapshot taken when a resolution starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    generation: u64,
    make: Option<String>,
    model: Option<String>,
}

impl Ticket {
    pub fn make(&self) -> Option<&str> {
        self.make.as_deref()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }
}

#[derive(Debug, Default)]
struct Selection {
    generation: u64,
    make: Option<String>,
    model: Option<String>,
}

/// One form's walk down the make → model → year cascade.
///
/// Changing the make evicts the previous make's model and year answers and
/// clears the model; changing the model evicts the previous model's years.
/// Resolutions that settle after the selection moved on come back as
/// `None` so late answers are never shown for the wrong vehicle.
pub struct CascadeSession {
    resolver: Arc<AspectResolver>,
    selection: Mutex<Selection>,
}

impl CascadeSession {
    pub fn new(resolver: Arc<AspectResolver>) -> Self {
        Self {
            resolver,
            selection: Mutex::new(Selection::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Selection> {
        self.selection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ticket(&self) -> Ticket {
        let selection = self.lock();
        Ticket {
            generation: selection.generation,
            make: selection.make.clone(),
            model: selection.model.clone(),
        }
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.lock().generation == ticket.generation
    }

    pub fn select_make(&self, make: &str) -> Result<Ticket, ValidationError> {
        let normalized = require("make", make)?;
        {
            let mut selection = self.lock();
            let unchanged = selection
                .make
                .as_deref()
                .is_some_and(|current| normalize_part(current) == normalized);
            if !unchanged {
                if let Some(previous) = selection.make.take() {
                    self.resolver.invalidate_make_scope(&previous);
                }
                selection.make = Some(make.trim().to_string());
                selection.model = None;
                selection.generation += 1;
            }
        }
        Ok(self.ticket())
    }

    pub fn select_model(&self, model: &str) -> Result<Ticket, ValidationError> {
        let normalized = require("model", model)?;
        {
            let mut selection = self.lock();
            let Some(make) = selection.make.clone() else {
                return Err(ValidationError::new("make", "select a make first"));
            };
            let unchanged = selection
                .model
                .as_deref()
                .is_some_and(|current| normalize_part(current) == normalized);
            if !unchanged {
                if let Some(previous) = selection.model.take() {
                    self.resolver.invalidate_model_scope(&make, &previous);
                }
                selection.model = Some(model.trim().to_string());
                selection.generation += 1;
            }
        }
        Ok(self.ticket())
    }

    pub async fn makes(&self) -> Resolved {
        self.resolver.resolve_makes().await
    }

    /// Models for the ticket's make, or `None` if the selection changed
    /// while resolving.
    pub async fn models(&self, ticket: &Ticket) -> Result<Option<Resolved>, ValidationError> {
        let make = ticket
            .make()
            .ok_or_else(|| ValidationError::new("make", "no make selected"))?;
        let resolved = self.resolver.resolve_models(make).await?;
        Ok(self.is_current(ticket).then_some(resolved))
    }

    pub async fn years(&self, ticket: &Ticket) -> Result<Option<Resolved>, ValidationError> {
        let make = ticket
            .make()
            .ok_or_else(|| ValidationError::new("make", "no make selected"))?;
        let model = ticket
            .model()
            .ok_or_else(|| ValidationError::new("model", "no model selected"))?;
        let resolved = self.resolver.resolve_years(make, model).await?;
        Ok(self.is_current(ticket).then_some(resolved))
    }
}
