use market::FormationConfig;
use serde::{Deserialize, Serialize};

use crate::decision::DecisionConfig;
use crate::error::EngineError;
use crate::health::HealthConfig;
use crate::permission::PermissionConfig;
use crate::regime::RegimeConfig;

/// Everything one symbol pipeline needs.
///
/// Validated once at load, then cloned into each pipeline. A pipeline never
/// sees an invalid config: [`crate::SymbolPipeline::new`] validates again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub formation: FormationConfig,
    pub regime: RegimeConfig,
    pub permission: PermissionConfig,
    pub health: HealthConfig,
    pub decision: DecisionConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        self.formation.validate()?;
        self.regime.validate()?;
        self.permission.validate()?;
        self.health.validate()?;
        self.decision.validate()?;
        Ok(())
    }
}
