//! Input requirement resolution and static signature validation.
//!
//! [`needed_inputs`] computes, recursively across nested controllers, what must exist in working
//! memory before a pipe can run. A per-path visited set terminates recursion through pipes that
//! route back to themselves. [`required_variables`] is narrower: the variables a pipe's own logic
//! references. Both feed [`validate_pipe`], whose findings are filtered through the configured
//! reaction policy by [`apply_reactions`].

use std::collections::HashSet;
use std::sync::Arc;

use pipewright_types::{ValidationErrorType, ValidationReaction, ValidationReactionConfig};
use tracing::{debug, warn};

use crate::concept::{Concept, NativeConceptCode};
use crate::error::{ResolveError, StaticValidationError, ValidationFinding};
use crate::libraries::Libraries;
use crate::pipe::{
    BatchParams, ConditionExpression, InputRequirement, InputRequirements, Multiplicity, Pipe, PipeCondition, PipeKind, PipeOperator,
    SubPipe,
};
use crate::templates::TemplateEngine;

/// Variables that must be present before `pipe` can run.
pub fn needed_inputs(libraries: &Libraries, templates: &dyn TemplateEngine, pipe: &Pipe) -> Result<InputRequirements, ResolveError> {
    needed_inputs_visiting(libraries, templates, pipe, &HashSet::new())
}

fn needed_inputs_visiting(
    libraries: &Libraries,
    templates: &dyn TemplateEngine,
    pipe: &Pipe,
    visited: &HashSet<String>,
) -> Result<InputRequirements, ResolveError> {
    if visited.contains(&pipe.code) {
        return Ok(InputRequirements::new());
    }
    let mut visited = visited.clone();
    visited.insert(pipe.code.clone());

    match &pipe.kind {
        PipeKind::Operator(_) => Ok(pipe.inputs.clone()),
        PipeKind::Sequence(sequence) => {
            let mut needed = InputRequirements::new();
            let mut produced: HashSet<String> = HashSet::new();
            for step in &sequence.steps {
                let target = libraries.pipes().get_required(&step.pipe_code, &pipe.code)?;
                let step_needs = sub_pipe_needs(libraries, templates, pipe, &target, step, &visited)?;
                for requirement in step_needs.iter() {
                    if !produced.contains(&requirement.variable_name) {
                        needed.add(requirement.clone());
                    }
                }
                produced.extend(written_names(&target, step));
            }
            Ok(needed)
        }
        PipeKind::Parallel(parallel) => {
            let mut needed = InputRequirements::new();
            for branch in &parallel.parallels {
                let target = libraries.pipes().get_required(&branch.pipe_code, &pipe.code)?;
                needed.merge(sub_pipe_needs(libraries, templates, pipe, &target, branch, &visited)?);
            }
            Ok(needed)
        }
        PipeKind::Condition(condition) => {
            let mut needed = InputRequirements::new();
            for variable in condition_variables(templates, condition)? {
                needed.add(declared_or_anything(libraries, pipe, &variable));
            }
            for code in condition.outcome_pipe_codes() {
                let target = libraries.pipes().get_required(code, &pipe.code)?;
                needed.merge(needed_inputs_visiting(libraries, templates, &target, &visited)?);
            }
            Ok(needed)
        }
        PipeKind::Batch(batch) => {
            let branch = libraries.pipes().get_required(&batch.branch_pipe_code, &pipe.code)?;
            let branch_needs = needed_inputs_visiting(libraries, templates, &branch, &visited)?;
            absorb_batch(pipe, &branch, branch_needs, &batch.batch_params)
        }
    }
}

fn sub_pipe_needs(
    libraries: &Libraries,
    templates: &dyn TemplateEngine,
    owner: &Pipe,
    target: &Pipe,
    sub_pipe: &SubPipe,
    visited: &HashSet<String>,
) -> Result<InputRequirements, ResolveError> {
    let needs = needed_inputs_visiting(libraries, templates, target, visited)?;
    match &sub_pipe.batch_params {
        Some(batch_params) => absorb_batch(owner, target, needs, batch_params),
        None => Ok(needs),
    }
}

/// Names a sequence step leaves in memory: its result, plus every branch result of a parallel
/// that adds each output. Unnamed branches are stored under their pipe code.
fn written_names(target: &Pipe, step: &SubPipe) -> Vec<String> {
    let mut names: Vec<String> = step.output_name.iter().cloned().collect();
    if let PipeKind::Parallel(parallel) = &target.kind
        && parallel.add_each_output
    {
        names.extend(
            parallel
                .parallels
                .iter()
                .map(|branch| branch.output_name.clone().unwrap_or_else(|| branch.pipe_code.clone())),
        );
    }
    names
}

/// Replaces the per-item variable with the list it is drawn from.
///
/// The item must be a declared input of the branch; the list takes its concept.
fn absorb_batch(
    owner: &Pipe,
    branch: &Pipe,
    mut needs: InputRequirements,
    batch_params: &BatchParams,
) -> Result<InputRequirements, ResolveError> {
    let item = branch
        .inputs
        .get(&batch_params.input_item_name)
        .ok_or_else(|| ResolveError::BatchItemNotDeclared {
            pipe_code: owner.code.clone(),
            branch_pipe_code: branch.code.clone(),
            item_name: batch_params.input_item_name.clone(),
        })?;
    needs.remove(&batch_params.input_item_name);
    let mut absorbed = InputRequirements::new();
    absorbed.add(InputRequirement {
        variable_name: batch_params.input_list_name.clone(),
        concept: item.concept.clone(),
        multiplicity: Multiplicity::List,
    });
    absorbed.merge(needs);
    Ok(absorbed)
}

fn declared_or_anything(libraries: &Libraries, pipe: &Pipe, variable: &str) -> InputRequirement {
    pipe.inputs.get(variable).cloned().unwrap_or_else(|| InputRequirement {
        variable_name: variable.to_string(),
        concept: libraries.concepts().native(NativeConceptCode::Anything),
        multiplicity: Multiplicity::Single,
    })
}

/// Expression variables, then the alias target, which must already be in memory.
fn condition_variables(templates: &dyn TemplateEngine, condition: &PipeCondition) -> Result<Vec<String>, ResolveError> {
    let mut variables = match &condition.expression {
        ConditionExpression::Expression(expression) => templates.expression_variables(expression)?,
        ConditionExpression::Template(template) => templates.required_variables(template)?,
    };
    if let Some(target) = &condition.alias_target
        && !variables.contains(target)
    {
        variables.push(target.clone());
    }
    Ok(variables)
}

/// Variables a pipe's own logic references.
///
/// Operators report the roots of the templates they render plus the media inputs they consume;
/// a condition reports its expression variables; a batch its list variable. Sequences and
/// parallels have no logic of their own and report their needed inputs.
pub fn required_variables(libraries: &Libraries, templates: &dyn TemplateEngine, pipe: &Pipe) -> Result<Vec<String>, ResolveError> {
    let mut variables: Vec<String> = Vec::new();
    let mut extend = |names: Vec<String>| {
        for name in names {
            if !variables.contains(&name) {
                variables.push(name);
            }
        }
    };

    match &pipe.kind {
        PipeKind::Operator(PipeOperator::Llm(llm)) => {
            extend(templates.required_variables(&llm.prompt_template)?);
            if let Some(system_prompt) = &llm.system_prompt {
                extend(templates.required_variables(system_prompt)?);
            }
            extend(media_inputs(libraries, pipe));
        }
        PipeKind::Operator(PipeOperator::ImgGen(img_gen)) => match &img_gen.prompt_template {
            Some(template) => extend(templates.required_variables(template)?),
            None => extend(pipe.inputs.names()),
        },
        PipeKind::Operator(PipeOperator::Extract(_)) | PipeKind::Operator(PipeOperator::Func(_)) => extend(pipe.inputs.names()),
        PipeKind::Operator(PipeOperator::Compose(compose)) => extend(templates.required_variables(&compose.template)?),
        PipeKind::Condition(condition) => extend(condition_variables(templates, condition)?),
        PipeKind::Batch(batch) => extend(vec![batch.batch_params.input_list_name.clone()]),
        PipeKind::Sequence(_) | PipeKind::Parallel(_) => extend(needed_inputs(libraries, templates, pipe)?.names()),
    }
    Ok(variables)
}

/// Declared inputs attached to a prompt as images rather than interpolated.
pub(crate) fn media_inputs(libraries: &Libraries, pipe: &Pipe) -> Vec<String> {
    let concepts = libraries.concepts();
    let image = concepts.native(NativeConceptCode::Image);
    pipe.inputs
        .iter()
        .filter(|input| !input.concept.is_wildcard() && concepts.is_compatible(&input.concept, &image, false))
        .map(|input| input.variable_name.clone())
        .collect()
}

/// Static checks of a pipe's declared signature against what it actually uses.
pub fn validate_pipe(libraries: &Libraries, templates: &dyn TemplateEngine, pipe: &Pipe) -> Result<Vec<ValidationFinding>, ResolveError> {
    let mut findings = Vec::new();
    let finding = |error_type: ValidationErrorType, message: String| ValidationFinding {
        error_type,
        pipe_code: pipe.code.clone(),
        message,
    };

    match &pipe.kind {
        PipeKind::Operator(_) => {
            let required = required_variables(libraries, templates, pipe)?;
            for variable in &required {
                if !pipe.inputs.contains(variable) {
                    findings.push(finding(
                        ValidationErrorType::MissingInputVariable,
                        format!("variable '{variable}' is used but not declared as an input"),
                    ));
                }
            }
            for declared in pipe.inputs.names() {
                if !required.contains(&declared) {
                    findings.push(finding(
                        ValidationErrorType::ExtraneousInputVariable,
                        format!("input '{declared}' is declared but never used"),
                    ));
                }
            }
        }
        _ => {
            let needed = needed_inputs(libraries, templates, pipe)?;
            let concepts = libraries.concepts();
            for requirement in needed.iter() {
                let Some(declared) = pipe.inputs.get(&requirement.variable_name) else {
                    findings.push(finding(
                        ValidationErrorType::MissingInputVariable,
                        format!("variable '{}' is needed but not declared as an input", requirement.variable_name),
                    ));
                    continue;
                };
                if !concepts.is_compatible(&declared.concept, &requirement.concept, false) {
                    findings.push(finding(
                        ValidationErrorType::InadequateInputConcept,
                        format!(
                            "input '{}' is declared as '{}' but '{}' is needed",
                            requirement.variable_name, declared.concept, requirement.concept
                        ),
                    ));
                }
                if declared.multiplicity.is_multiple() != requirement.multiplicity.is_multiple() {
                    findings.push(finding(
                        ValidationErrorType::InadequateInputMultiplicity,
                        format!(
                            "input '{}' is declared as {} but {} is needed",
                            requirement.variable_name, declared.multiplicity, requirement.multiplicity
                        ),
                    ));
                }
            }
            for declared in pipe.inputs.names() {
                if !needed.contains(&declared) {
                    findings.push(finding(
                        ValidationErrorType::ExtraneousInputVariable,
                        format!("input '{declared}' is declared but not needed by any sub-pipe"),
                    ));
                }
            }
            if let Some((produced, origin)) = produced_output(libraries, pipe)
                && !concepts.is_compatible(&produced, &pipe.output, false)
            {
                findings.push(finding(
                    ValidationErrorType::InadequateOutputConcept,
                    format!("{origin} produces '{produced}' but the pipe declares '{}'", pipe.output),
                ));
            }
        }
    }
    Ok(findings)
}

/// Concept a controller ends up producing, when it is known statically.
fn produced_output(libraries: &Libraries, pipe: &Pipe) -> Option<(Arc<Concept>, String)> {
    match &pipe.kind {
        PipeKind::Sequence(sequence) => {
            let last = sequence.steps.last()?;
            let target = libraries.pipes().get(&last.pipe_code)?;
            Some((target.output.clone(), format!("last step '{}'", last.pipe_code)))
        }
        PipeKind::Batch(batch) => {
            let branch = libraries.pipes().get(&batch.branch_pipe_code)?;
            Some((branch.output.clone(), format!("branch '{}'", batch.branch_pipe_code)))
        }
        PipeKind::Parallel(parallel) => parallel
            .combined_output
            .clone()
            .map(|combined| (combined, "combined output".to_string())),
        PipeKind::Condition(_) | PipeKind::Operator(_) => None,
    }
}

/// Applies the reaction policy: ignored findings are dropped, logged ones are reported at warn
/// level, and the rest are raised together.
pub fn apply_reactions(
    pipe_code: &str,
    findings: Vec<ValidationFinding>,
    reactions: &ValidationReactionConfig,
) -> Result<(), StaticValidationError> {
    let mut raised = Vec::new();
    for finding in findings {
        match reactions.reaction_for(finding.error_type) {
            ValidationReaction::Ignore => debug!(pipe_code, error_type = %finding.error_type, "ignoring validation finding"),
            ValidationReaction::Log => warn!(pipe_code, error_type = %finding.error_type, message = %finding.message, "validation finding"),
            ValidationReaction::Raise => raised.push(finding),
        }
    }
    if raised.is_empty() {
        Ok(())
    } else {
        Err(StaticValidationError {
            pipe_code: pipe_code.to_string(),
            findings: raised,
        })
    }
}
