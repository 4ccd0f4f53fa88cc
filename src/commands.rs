//! Textual command interface of the jitterer, for host scripting.
//!
//! Commands are a single line of whitespace-separated tokens; queries reply
//! with JSON.

use nalgebra::Vector3;
use serde_json::json;

use crate::constraints::{ToolDirectionConstraint, ToolPositionConstraint};
use crate::error::{Result, SamplingError};
use crate::jitterer::Jitterer;

/// Reply of [`Jitterer::run_command`].
#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    /// The command mutated the jitterer and has nothing to report.
    Done,
    /// A query reply.
    Json(serde_json::Value),
}

fn parse_scalar<T: std::str::FromStr>(tokens: &mut std::str::SplitWhitespace<'_>, what: &str) -> Result<T> {
    tokens
        .next()
        .ok_or_else(|| SamplingError::invalid_argument(format!("missing {}", what)))?
        .parse::<T>()
        .map_err(|_| SamplingError::invalid_argument(format!("malformed {}", what)))
}

fn parse_vector3(tokens: &mut std::str::SplitWhitespace<'_>, what: &str) -> Result<Vector3<f64>> {
    let x = parse_scalar::<f64>(tokens, what)?;
    let y = parse_scalar::<f64>(tokens, what)?;
    let z = parse_scalar::<f64>(tokens, what)?;
    Ok(Vector3::new(x, y, z))
}

fn parse_bool(tokens: &mut std::str::SplitWhitespace<'_>, what: &str) -> Result<bool> {
    let token = tokens
        .next()
        .ok_or_else(|| SamplingError::invalid_argument(format!("missing {}", what)))?;
    match token {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(SamplingError::invalid_argument(format!(
            "malformed {}: '{}'",
            what, token
        ))),
    }
}

impl Jitterer {
    /// Executes one textual command and returns its reply.
    pub fn run_command(&mut self, line: &str) -> Result<CommandReply> {
        let mut tokens = line.split_whitespace();
        let command = tokens
            .next()
            .ok_or_else(|| SamplingError::invalid_argument("empty command"))?;
        match command {
            "SetMaxJitter" => {
                let value = parse_scalar::<f64>(&mut tokens, "max jitter")?;
                self.set_max_jitter(value)?;
                Ok(CommandReply::Done)
            }
            "SetMaxIterations" => {
                let value = parse_scalar::<u32>(&mut tokens, "max iterations")?;
                self.set_max_iterations(value);
                Ok(CommandReply::Done)
            }
            "SetMaxLinkDistThresh" => {
                let value = parse_scalar::<f64>(&mut tokens, "link distance threshold")?;
                self.set_link_dist_thresh(value)?;
                Ok(CommandReply::Done)
            }
            "SetPerturbation" => {
                let value = parse_scalar::<f64>(&mut tokens, "perturbation")?;
                self.set_perturbation(value)?;
                Ok(CommandReply::Done)
            }
            "SetResultOnRobot" => {
                let value = parse_bool(&mut tokens, "set-result flag")?;
                self.set_result_on_robot(value);
                Ok(CommandReply::Done)
            }
            "SetNeighDistThresh" => {
                let value = parse_scalar::<f64>(&mut tokens, "neighbor distance threshold")?;
                self.set_neigh_dist_thresh(value)?;
                Ok(CommandReply::Done)
            }
            "SetResetIterationsOnSample" => {
                let value = parse_bool(&mut tokens, "reset-iterations flag")?;
                self.set_reset_iterations_on_sample(value);
                Ok(CommandReply::Done)
            }
            "SetConstraintToolDirection" => {
                let manip = match tokens.next() {
                    // No manipulator name clears the constraint.
                    None => {
                        self.clear_constraint_tool_direction();
                        return Ok(CommandReply::Done);
                    }
                    Some(name) => name.to_string(),
                };
                let manip_dir = parse_vector3(&mut tokens, "manipulator direction")?;
                let global_dir = parse_vector3(&mut tokens, "global direction")?;
                let cos_thresh = parse_scalar::<f64>(&mut tokens, "cosine threshold")?;
                let constraint = ToolDirectionConstraint::new(manip_dir, global_dir, cos_thresh)?;
                self.set_constraint_tool_direction(&manip, constraint)?;
                Ok(CommandReply::Done)
            }
            "SetConstraintToolPosition" => {
                let manip = match tokens.next() {
                    None => {
                        self.clear_constraint_tool_position();
                        return Ok(CommandReply::Done);
                    }
                    Some(name) => name.to_string(),
                };
                let right = parse_vector3(&mut tokens, "right axis")?;
                let up = parse_vector3(&mut tokens, "up axis")?;
                let dir = parse_vector3(&mut tokens, "dir axis")?;
                let pos = parse_vector3(&mut tokens, "position")?;
                let extents = parse_vector3(&mut tokens, "extents")?;
                let constraint = ToolPositionConstraint::new(right, up, dir, pos, extents);
                self.set_constraint_tool_position(&manip, constraint)?;
                Ok(CommandReply::Done)
            }
            "SetManipulatorBias" => {
                let manip = tokens
                    .next()
                    .ok_or_else(|| SamplingError::invalid_argument("missing manipulator name"))?
                    .to_string();
                let direction = parse_vector3(&mut tokens, "bias direction")?;
                let null_prob = match tokens.next() {
                    Some(t) => t.parse::<f64>().map_err(|_| {
                        SamplingError::invalid_argument("malformed null sample probability")
                    })?,
                    None => 0.60,
                };
                let null_bias_prob = match tokens.next() {
                    Some(t) => t.parse::<f64>().map_err(|_| {
                        SamplingError::invalid_argument("malformed null bias sample probability")
                    })?,
                    None => 0.50,
                };
                let delta_prob = match tokens.next() {
                    Some(t) => t.parse::<f64>().map_err(|_| {
                        SamplingError::invalid_argument("malformed delta sample probability")
                    })?,
                    None => 0.50,
                };
                self.set_manipulator_bias(&manip, direction, null_prob, null_bias_prob, delta_prob)?;
                Ok(CommandReply::Done)
            }
            "GetFailuresCount" => {
                let value = serde_json::to_value(self.failures()).map_err(|e| {
                    SamplingError::invalid_state(format!("failure counter not serializable: {}", e))
                })?;
                Ok(CommandReply::Json(value))
            }
            "GetCurrentParameters" => Ok(CommandReply::Json(self.current_parameters_json())),
            other => Err(SamplingError::invalid_argument(format!(
                "unknown command '{}'",
                other
            ))),
        }
    }

    fn current_parameters_json(&self) -> serde_json::Value {
        let (max_jitter, max_iterations, link_dist, perturbation, neigh_dist, reset_iterations) =
            self.current_option_values();
        let mut output = json!({
            "currentJointValues": self.fulldof(),
            "maxJitter": max_jitter,
            "maxJitterIterations": max_iterations,
            "maxJitterLinkDist": link_dist,
            "jitterPerturbation": perturbation,
            "jitterNeighDistThresh": neigh_dist,
            "resetIterationsOnSample": reset_iterations,
        });
        let (use_biasing, bias_direction, null_prob, null_bias_prob, delta_prob) =
            self.bias_params();
        if use_biasing {
            output["jitterBiasDirection"] =
                json!([bias_direction.x, bias_direction.y, bias_direction.z]);
            output["nullSampleProb"] = json!(null_prob);
            output["nullBiasSampleProb"] = json!(null_bias_prob);
            output["deltaSampleProb"] = json!(delta_prob);
        }
        if let Some(name) = self.manip_name() {
            output["manipName"] = json!(name);
            let tool = self.local_tool();
            output["localToolPose"] = json!([
                tool.rotation.w,
                tool.rotation.i,
                tool.rotation.j,
                tool.rotation.k,
                tool.translation.vector.x,
                tool.translation.vector.y,
                tool.translation.vector.z,
            ]);
            if let Some(constraint) = self.tool_direction_constraint() {
                output["constraintToolDirection"] = constraint.to_json();
            }
            if let Some(constraint) = self.tool_position_constraint() {
                output["constraintToolPosition"] = constraint.to_json();
            }
        }
        output
    }
}
