//! Pluggable validators run before and after a change is applied.
//!
//! Validators are registered on a [`ValidationRegistry`] that is built at
//! startup and handed to the apply pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use crate::change::{Change, ChangeType};
use crate::error::{CollabError, Result, ValidationStage};
use crate::model::{AnnotationStore, Role};

/// Read-only view a validator checks a change against.
///
/// For pre-validation this is the committed state, for post-validation the
/// staged state of the open transaction.
pub struct ValidationContext<'a> {
    pub store: &'a AnnotationStore,
    pub actor: &'a str,
}

/// Outcome of one validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub validator: String,
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn ok(validator: impl Into<String>) -> Self {
        Self {
            validator: validator.into(),
            error: None,
        }
    }

    pub fn fail(validator: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            validator: validator.into(),
            error: Some(error.into()),
        }
    }
}

/// Results of every validator that ran for a change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResultSet {
    pub results: Vec<ValidationResult>,
}

impl ValidationResultSet {
    pub fn ok(&self) -> bool {
        self.results.iter().all(|result| result.error.is_none())
    }

    pub fn messages(&self) -> Vec<String> {
        self.results
            .iter()
            .filter_map(|result| {
                result
                    .error
                    .as_ref()
                    .map(|error| format!("{}: {}", result.validator, error))
            })
            .collect()
    }

    /// Converts failures into a validation error for the given stage.
    pub fn into_result(self, stage: ValidationStage) -> Result<()> {
        if self.ok() {
            Ok(())
        } else {
            Err(CollabError::validation(stage, self.messages()))
        }
    }
}

/// A rule checked against a change.
pub trait Validator: Send + Sync {
    fn name(&self) -> &str;

    /// Change types this validator applies to; `None` means all of them.
    fn change_types(&self) -> Option<Vec<ChangeType>> {
        None
    }

    fn backend_pre_validate(&self, change: &Change, ctx: &ValidationContext<'_>) -> ValidationResult {
        let _ = (change, ctx);
        ValidationResult::ok(self.name())
    }

    fn backend_post_validate(&self, change: &Change, ctx: &ValidationContext<'_>) -> ValidationResult {
        let _ = (change, ctx);
        ValidationResult::ok(self.name())
    }
}

/// Validators keyed by the change types they apply to.
#[derive(Default, Clone)]
pub struct ValidationRegistry {
    for_all: Vec<Arc<dyn Validator>>,
    by_type: HashMap<ChangeType, Vec<Arc<dyn Validator>>>,
}

impl ValidationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in validators and the given permission table.
    pub fn with_builtin(permissions: PermissionTable) -> Self {
        let mut registry = Self::new();
        registry
            .register(Arc::new(ChangedIdsPresent))
            .register(Arc::new(PermissionValidator::new(permissions)))
            .register(Arc::new(LocationBounds));
        registry
    }

    pub fn register(&mut self, validator: Arc<dyn Validator>) -> &mut Self {
        match validator.change_types() {
            None => self.for_all.push(validator),
            Some(types) => {
                for change_type in types {
                    self.by_type
                        .entry(change_type)
                        .or_default()
                        .push(Arc::clone(&validator));
                }
            }
        }
        self
    }

    fn validators_for(&self, change_type: ChangeType) -> impl Iterator<Item = &Arc<dyn Validator>> {
        self.for_all
            .iter()
            .chain(self.by_type.get(&change_type).into_iter().flatten())
    }

    pub fn backend_pre_validate(&self, change: &Change, ctx: &ValidationContext<'_>) -> ValidationResultSet {
        ValidationResultSet {
            results: self
                .validators_for(change.type_name())
                .map(|validator| validator.backend_pre_validate(change, ctx))
                .collect(),
        }
    }

    pub fn backend_post_validate(&self, change: &Change, ctx: &ValidationContext<'_>) -> ValidationResultSet {
        ValidationResultSet {
            results: self
                .validators_for(change.type_name())
                .map(|validator| validator.backend_post_validate(change, ctx))
                .collect(),
        }
    }
}

/// Rejects changes that name no affected ids.
pub struct ChangedIdsPresent;

impl Validator for ChangedIdsPresent {
    fn name(&self) -> &str {
        "ChangedIdsPresent"
    }

    fn backend_pre_validate(&self, change: &Change, _ctx: &ValidationContext<'_>) -> ValidationResult {
        if change.changed_ids().is_empty() {
            ValidationResult::fail(self.name(), "changedIds must not be empty")
        } else {
            ValidationResult::ok(self.name())
        }
    }
}

/// Minimum role required per change type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionTable {
    required: HashMap<ChangeType, Role>,
}

impl Default for PermissionTable {
    fn default() -> Self {
        let required = ChangeType::ALL
            .into_iter()
            .map(|change_type| {
                let role = match change_type {
                    ChangeType::AddFeature
                    | ChangeType::CopyFeature
                    | ChangeType::LocationStart
                    | ChangeType::LocationEnd
                    | ChangeType::Type => Role::User,
                    ChangeType::AddAssembly
                    | ChangeType::DeleteAssembly
                    | ChangeType::AddFeaturesFromFile
                    | ChangeType::DeleteFeature
                    | ChangeType::User
                    | ChangeType::DeleteUser => Role::Admin,
                };
                (change_type, role)
            })
            .collect();
        Self { required }
    }
}

impl PermissionTable {
    pub fn set(&mut self, change_type: ChangeType, role: Role) -> &mut Self {
        self.required.insert(change_type, role);
        self
    }

    pub fn required(&self, change_type: ChangeType) -> Role {
        self.required
            .get(&change_type)
            .copied()
            .unwrap_or(Role::Admin)
    }
}

/// Checks the acting user exists and holds the role the change needs.
pub struct PermissionValidator {
    table: PermissionTable,
}

impl PermissionValidator {
    pub fn new(table: PermissionTable) -> Self {
        Self { table }
    }
}

impl Validator for PermissionValidator {
    fn name(&self) -> &str {
        "Permission"
    }

    fn backend_pre_validate(&self, change: &Change, ctx: &ValidationContext<'_>) -> ValidationResult {
        let required = self.table.required(change.type_name());
        match ctx.store.user(ctx.actor) {
            None => ValidationResult::fail(self.name(), format!("Unknown user '{}'", ctx.actor)),
            Some(user) if !user.role.permits(required) => ValidationResult::fail(
                self.name(),
                format!(
                    "User '{}' with role '{}' may not submit {} (requires '{}')",
                    user.id,
                    user.role,
                    change.type_name(),
                    required
                ),
            ),
            Some(_) => ValidationResult::ok(self.name()),
        }
    }
}

/// Rejects touched features with inverted coordinates or that escape
/// their parent's span.
pub struct LocationBounds;

impl Validator for LocationBounds {
    fn name(&self) -> &str {
        "LocationBounds"
    }

    fn change_types(&self) -> Option<Vec<ChangeType>> {
        Some(vec![
            ChangeType::AddAssembly,
            ChangeType::AddFeature,
            ChangeType::AddFeaturesFromFile,
            ChangeType::CopyFeature,
            ChangeType::LocationStart,
            ChangeType::LocationEnd,
        ])
    }

    fn backend_post_validate(&self, change: &Change, ctx: &ValidationContext<'_>) -> ValidationResult {
        let features = ctx.store.features();
        let mut problems = Vec::new();
        for id in change.changed_ids() {
            let Some(node) = features.get(id) else {
                continue;
            };
            if node.start > node.end {
                problems.push(format!(
                    "feature '{}' starts at {} after its end {}",
                    id, node.start, node.end
                ));
            }
            if let Some(parent) = node.parent.as_deref().and_then(|p| features.get(p)) {
                if node.start < parent.start || node.end > parent.end {
                    problems.push(format!(
                        "feature '{}' ({}..{}) lies outside parent '{}' ({}..{})",
                        id, node.start, node.end, parent.id, parent.start, parent.end
                    ));
                }
            }
            for child_id in &node.children {
                if let Some(child) = features.get(child_id) {
                    if child.start < node.start || child.end > node.end {
                        problems.push(format!(
                            "child '{}' ({}..{}) lies outside feature '{}' ({}..{})",
                            child_id, child.start, child.end, id, node.start, node.end
                        ));
                    }
                }
            }
        }
        if problems.is_empty() {
            ValidationResult::ok(self.name())
        } else {
            ValidationResult::fail(self.name(), problems.join(", "))
        }
    }
}
