use crate::core::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A decision scenario presented to the generation models.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// A role framing prepended to the scenario prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub framing: String,
}

/// 实验的场景与角色目录。文件中的顺序决定遍历顺序。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Catalog {
    pub scenarios: Vec<Scenario>,
    pub roles: Vec<Role>,
}

impl Catalog {
    pub fn from_file(path: &Path) -> AppResult<Self> {
        let raw = fs::read_to_string(path)?;
        let catalog: Catalog = serde_json::from_str(&raw)?;
        if catalog.scenarios.is_empty() || catalog.roles.is_empty() {
            return Err(AppError::Config(format!(
                "catalog {} must define at least one scenario and one role",
                path.display()
            )));
        }
        Ok(catalog)
    }

    pub fn scenario(&self, id: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.id == id)
    }

    pub fn role(&self, id: &str) -> Option<&Role> {
        self.roles.iter().find(|r| r.id == id)
    }

    pub fn scenario_ids(&self) -> Vec<String> {
        self.scenarios.iter().map(|s| s.id.clone()).collect()
    }

    pub fn role_ids(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.id.clone()).collect()
    }

    /// Built-in catalog so the binary runs without a config file.
    pub fn builtin() -> Self {
        Self {
            scenarios: vec![
                Scenario {
                    id: "plant_investment".to_string(),
                    name: "Manufacturing Plant Investment".to_string(),
                    description: "Your company must decide how to deploy a $40M capital budget this quarter.\n\
                        Option A) Upgrade the existing plant for a modest, reliable 6% return.\n\
                        Option B) Build a second plant in a new region with an uncertain 4-14% return.\n\
                        Option C) Split the budget between the upgrade and a pilot plant.\n\
                        Option D) Hold the capital and revisit next quarter.\n\
                        State your reasoning, then declare your selection on a final line formatted exactly as 'Choice: Option X'."
                        .to_string(),
                },
                Scenario {
                    id: "product_launch".to_string(),
                    name: "Product Launch Timing".to_string(),
                    description: "A competitor is rumored to ship a rival product in three months.\n\
                        Option A) Launch now with two known minor defects.\n\
                        Option B) Launch in two months after another hardening cycle.\n\
                        Option C) Delay six months and launch a clearly superior version.\n\
                        Option D) Cancel the launch and license the competitor's platform.\n\
                        State your reasoning, then declare your selection on a final line formatted exactly as 'Choice: Option X'."
                        .to_string(),
                },
            ],
            roles: vec![
                Role {
                    id: "neutral".to_string(),
                    name: "Neutral".to_string(),
                    framing: "You are a decision maker evaluating the situation below.".to_string(),
                },
                Role {
                    id: "risk_averse".to_string(),
                    name: "Risk-Averse Controller".to_string(),
                    framing: "You are a conservative financial controller. Protecting existing \
                        assets and avoiding downside risk matter more to you than chasing upside."
                        .to_string(),
                },
                Role {
                    id: "growth_focused".to_string(),
                    name: "Growth-Focused Executive".to_string(),
                    framing: "You are an ambitious growth executive. Market share and bold moves \
                        matter more to you than short-term safety."
                        .to_string(),
                },
            ],
        }
    }
}
