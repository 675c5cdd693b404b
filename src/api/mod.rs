//! Appliance REST surface. Payloads stay opaque JSON; envelopes are
//! unwrapped to their `data` member.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;
use crate::http::{ApiRequest, Executor};

/// Program option as sent with a program start or selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramOption {
    pub key: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl ProgramOption {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// Typed access to the appliance resource hierarchy.
#[derive(Debug, Clone)]
pub struct ApplianceApi {
    executor: Executor,
}

impl ApplianceApi {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    /// `data.homeappliances` of the appliance list.
    pub async fn get_appliances(&self) -> Result<Vec<Value>> {
        let mut data = self.get("/api/homeappliances").await?;
        Ok(match data.get_mut("homeappliances").map(Value::take) {
            Some(Value::Array(appliances)) => appliances,
            _ => Vec::new(),
        })
    }

    pub async fn get_appliance(&self, haid: &str) -> Result<Value> {
        self.get(&appliance_path(haid, "")).await
    }

    pub async fn get_active_program(&self, haid: &str) -> Result<Value> {
        self.get(&appliance_path(haid, "/programs/active")).await
    }

    pub async fn set_active_program(
        &self,
        haid: &str,
        program_key: &str,
        options: &[ProgramOption],
    ) -> Result<()> {
        self.put(
            &appliance_path(haid, "/programs/active"),
            program_body(program_key, options),
        )
        .await
    }

    pub async fn set_active_program_option(
        &self,
        haid: &str,
        option: &ProgramOption,
    ) -> Result<()> {
        let path = appliance_path(haid, &format!("/programs/active/options/{}", option.key));
        self.put(&path, json!({ "data": option })).await
    }

    pub async fn stop_active_program(&self, haid: &str) -> Result<()> {
        self.executor
            .send(&ApiRequest::delete(appliance_path(haid, "/programs/active")))
            .await?;
        Ok(())
    }

    pub async fn get_selected_program(&self, haid: &str) -> Result<Value> {
        self.get(&appliance_path(haid, "/programs/selected")).await
    }

    pub async fn set_selected_program(
        &self,
        haid: &str,
        program_key: &str,
        options: &[ProgramOption],
    ) -> Result<()> {
        self.put(
            &appliance_path(haid, "/programs/selected"),
            program_body(program_key, options),
        )
        .await
    }

    pub async fn set_selected_program_option(
        &self,
        haid: &str,
        option: &ProgramOption,
    ) -> Result<()> {
        let path = appliance_path(haid, &format!("/programs/selected/options/{}", option.key));
        self.put(&path, json!({ "data": option })).await
    }

    pub async fn get_available_programs(&self, haid: &str) -> Result<Value> {
        self.get(&appliance_path(haid, "/programs/available")).await
    }

    pub async fn get_available_program(&self, haid: &str, program_key: &str) -> Result<Value> {
        self.get(&appliance_path(
            haid,
            &format!("/programs/available/{program_key}"),
        ))
        .await
    }

    pub async fn get_status(&self, haid: &str) -> Result<Value> {
        self.get(&appliance_path(haid, "/status")).await
    }

    pub async fn get_status_value(&self, haid: &str, status_key: &str) -> Result<Value> {
        self.get(&appliance_path(haid, &format!("/status/{status_key}")))
            .await
    }

    pub async fn get_settings(&self, haid: &str) -> Result<Value> {
        self.get(&appliance_path(haid, "/settings")).await
    }

    pub async fn get_setting(&self, haid: &str, setting_key: &str) -> Result<Value> {
        self.get(&appliance_path(haid, &format!("/settings/{setting_key}")))
            .await
    }

    pub async fn set_setting(&self, haid: &str, setting_key: &str, value: Value) -> Result<()> {
        self.put(
            &appliance_path(haid, &format!("/settings/{setting_key}")),
            json!({ "data": { "key": setting_key, "value": value } }),
        )
        .await
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.executor.send(&ApiRequest::get(path)).await?.into_data()
    }

    async fn put(&self, path: &str, body: Value) -> Result<()> {
        self.executor.send(&ApiRequest::put(path, body)).await?;
        Ok(())
    }
}

fn appliance_path(haid: &str, suffix: &str) -> String {
    format!("/api/homeappliances/{haid}{suffix}")
}

fn program_body(program_key: &str, options: &[ProgramOption]) -> Value {
    let mut data = json!({ "key": program_key });
    if !options.is_empty() {
        data["options"] = json!(options);
    }
    json!({ "data": data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn program_body_omits_empty_options() {
        assert_eq!(
            program_body("Dishcare.Dishwasher.Program.Eco50", &[]),
            json!({ "data": { "key": "Dishcare.Dishwasher.Program.Eco50" } })
        );
    }

    #[test]
    fn program_body_serializes_options_with_units() {
        let options = [
            ProgramOption::new("BSH.Common.Option.Duration", 3600).with_unit("seconds"),
            ProgramOption::new("Cooking.Oven.Option.SetpointTemperature", 180),
        ];
        assert_eq!(
            program_body("Cooking.Oven.Program.HeatingMode.HotAir", &options),
            json!({
                "data": {
                    "key": "Cooking.Oven.Program.HeatingMode.HotAir",
                    "options": [
                        { "key": "BSH.Common.Option.Duration", "value": 3600, "unit": "seconds" },
                        { "key": "Cooking.Oven.Option.SetpointTemperature", "value": 180 }
                    ]
                }
            })
        );
    }

    #[test]
    fn appliance_paths_follow_resource_hierarchy() {
        assert_eq!(appliance_path("SIEMENS-1", ""), "/api/homeappliances/SIEMENS-1");
        assert_eq!(
            appliance_path("SIEMENS-1", "/programs/active"),
            "/api/homeappliances/SIEMENS-1/programs/active"
        );
    }
}
