//! Builds pipes from blueprints.

use std::sync::Arc;

use heck::ToSnakeCase;
use once_cell::sync::Lazy;
use pipewright_types::{PipeBlueprint, SubPipeBlueprint};
use regex::Regex;

use super::{
    BatchParams, ComposeOperator, ConditionExpression, ConditionOutcome, ExtractOperator, FuncOperator, ImgGenOperator,
    InputRequirement, InputRequirements, LlmOperator, Multiplicity, Pipe, PipeBatch, PipeCondition, PipeKind, PipeOperator,
    PipeParallel, PipeSequence, SubPipe, parse_concept_reference,
};
use crate::concept::{Concept, ConceptLibrary, NativeConceptCode};
use crate::error::{DefinitionError, TemplatingError};
use crate::memory::MAIN_STUFF_NAME;
use crate::templates::TemplateEngine;

static VARIABLE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid variable regex"));

/// Builds a pipe of `domain` from its blueprint.
///
/// Concept references are resolved against `concepts`; templates are parsed once so syntax errors
/// surface at load time instead of at run time.
pub fn make_pipe(
    domain: &str,
    code: &str,
    blueprint: &PipeBlueprint,
    concepts: &ConceptLibrary,
    templates: &dyn TemplateEngine,
) -> Result<Pipe, DefinitionError> {
    validate_pipe_code(code)?;
    let signature = blueprint.signature();
    let invalid = |reason: &str| DefinitionError::InvalidPipe {
        pipe_code: code.to_string(),
        reason: reason.to_string(),
    };
    let check_template = |source: &str| -> Result<(), DefinitionError> {
        templates
            .required_variables(source)
            .map(|_| ())
            .map_err(|source| templating_error(code, source))
    };

    let mut inputs = InputRequirements::new();
    for (variable_name, reference) in &signature.inputs {
        check_variable_name(code, "input variable", variable_name)?;
        let (concept, multiplicity) = resolve_reference(reference, domain, concepts, &format!("input '{variable_name}' of pipe '{code}'"))?;
        inputs.add(InputRequirement {
            variable_name: variable_name.clone(),
            concept,
            multiplicity,
        });
    }
    let (output, mut output_multiplicity) = resolve_reference(&signature.output, domain, concepts, &format!("output of pipe '{code}'"))?;

    let kind = match blueprint {
        PipeBlueprint::PipeSequence(sequence) => {
            if sequence.steps.is_empty() {
                return Err(invalid("a sequence needs at least one step"));
            }
            let steps = sequence
                .steps
                .iter()
                .map(|step| make_sub_pipe(code, step))
                .collect::<Result<Vec<_>, _>>()?;
            PipeKind::Sequence(PipeSequence { steps })
        }
        PipeBlueprint::PipeParallel(parallel) => {
            let parallels = parallel
                .parallels
                .iter()
                .map(|branch| make_sub_pipe(code, branch))
                .collect::<Result<Vec<_>, _>>()?;
            let combined_output = match &parallel.combined_output {
                Some(reference) => Some(resolve_concept(reference, domain, concepts, &format!("combined output of pipe '{code}'"))?),
                None => None,
            };
            PipeKind::Parallel(PipeParallel::new(
                code,
                parallels,
                parallel.add_each_output,
                combined_output,
                concepts.structures(),
            )?)
        }
        PipeBlueprint::PipeCondition(condition) => {
            let expression = match (&condition.expression, &condition.expression_template) {
                (Some(expression), None) => {
                    templates
                        .expression_variables(expression)
                        .map_err(|source| templating_error(code, source))?;
                    ConditionExpression::Expression(expression.clone())
                }
                (None, Some(template)) => {
                    check_template(template)?;
                    ConditionExpression::Template(template.clone())
                }
                _ => return Err(invalid("exactly one of expression or expression_template must be set")),
            };
            PipeKind::Condition(PipeCondition {
                expression,
                outcomes: condition
                    .outcomes
                    .iter()
                    .map(|(value, outcome)| (value.clone(), ConditionOutcome::parse(outcome)))
                    .collect(),
                default_outcome: ConditionOutcome::parse(&condition.default_outcome),
                alias_target: match &condition.add_alias_from_expression_to {
                    Some(target) => {
                        check_variable_name(code, "alias target", target)?;
                        Some(target.clone())
                    }
                    None => None,
                },
            })
        }
        PipeBlueprint::PipeBatch(batch) => {
            let batch_params = make_batch_params(code, &batch.input_list_name, &batch.input_item_name)?;
            PipeKind::Batch(PipeBatch {
                branch_pipe_code: batch.branch_pipe_code.clone(),
                batch_params,
            })
        }
        PipeBlueprint::PipeLlm(llm) => {
            check_template(&llm.prompt_template)?;
            if let Some(system_prompt) = &llm.system_prompt {
                check_template(system_prompt)?;
            }
            output_multiplicity = requested_multiplicity(code, output_multiplicity, llm.nb_output, llm.multiple_output)?;
            PipeKind::Operator(PipeOperator::Llm(LlmOperator {
                prompt_template: llm.prompt_template.clone(),
                system_prompt: llm.system_prompt.clone(),
            }))
        }
        PipeBlueprint::PipeImgGen(img_gen) => {
            match &img_gen.prompt_template {
                Some(template) => check_template(template)?,
                None if inputs.len() == 1 => {}
                None => return Err(invalid("without a prompt_template exactly one input must provide the prompt")),
            }
            output_multiplicity = requested_multiplicity(code, output_multiplicity, img_gen.nb_output, None)?;
            PipeKind::Operator(PipeOperator::ImgGen(ImgGenOperator {
                prompt_template: img_gen.prompt_template.clone(),
            }))
        }
        PipeBlueprint::PipeExtract(extract) => {
            let image = concepts.native(NativeConceptCode::Image);
            let pdf = concepts.native(NativeConceptCode::Pdf);
            let accepts_document = inputs.len() == 1
                && inputs.iter().all(|input| {
                    !input.multiplicity.is_multiple()
                        && (concepts.is_compatible(&input.concept, &image, false) || concepts.is_compatible(&input.concept, &pdf, false))
                });
            if !accepts_document {
                return Err(invalid("an extract pipe takes exactly one Image or PDF input"));
            }
            PipeKind::Operator(PipeOperator::Extract(ExtractOperator {
                page_views: extract.page_views,
            }))
        }
        PipeBlueprint::PipeFunc(func) => {
            if func.function_name.trim().is_empty() {
                return Err(invalid("function_name cannot be empty"));
            }
            PipeKind::Operator(PipeOperator::Func(FuncOperator {
                function_name: func.function_name.clone(),
            }))
        }
        PipeBlueprint::PipeCompose(compose) => {
            check_template(&compose.template)?;
            PipeKind::Operator(PipeOperator::Compose(ComposeOperator {
                template: compose.template.clone(),
            }))
        }
    };

    Ok(Pipe {
        code: code.to_string(),
        domain: domain.to_string(),
        description: signature.description.clone(),
        inputs,
        output,
        output_multiplicity,
        kind,
    })
}

fn validate_pipe_code(code: &str) -> Result<(), DefinitionError> {
    if code.is_empty() || code.to_snake_case() != code || !VARIABLE_NAME.is_match(code) {
        return Err(DefinitionError::InvalidCode {
            kind: "pipe",
            code: code.to_string(),
            reason: "pipe codes must be snake_case".to_string(),
        });
    }
    Ok(())
}

fn templating_error(pipe_code: &str, source: TemplatingError) -> DefinitionError {
    DefinitionError::Templating {
        pipe_code: pipe_code.to_string(),
        source,
    }
}

fn resolve_reference(
    reference: &str,
    domain: &str,
    concepts: &ConceptLibrary,
    context: &str,
) -> Result<(Arc<Concept>, Multiplicity), DefinitionError> {
    let (code, multiplicity) = parse_concept_reference(reference).ok_or_else(|| DefinitionError::UnknownConcept {
        reference: reference.to_string(),
        context: context.to_string(),
    })?;
    Ok((resolve_concept(&code, domain, concepts, context)?, multiplicity))
}

fn resolve_concept(reference: &str, domain: &str, concepts: &ConceptLibrary, context: &str) -> Result<Arc<Concept>, DefinitionError> {
    concepts
        .resolve_reference(reference, domain)
        .ok_or_else(|| DefinitionError::UnknownConcept {
            reference: reference.to_string(),
            context: context.to_string(),
        })
}

fn requested_multiplicity(
    pipe_code: &str,
    declared: Multiplicity,
    nb_output: Option<usize>,
    multiple_output: Option<bool>,
) -> Result<Multiplicity, DefinitionError> {
    match (nb_output, multiple_output) {
        (Some(0), _) => Err(DefinitionError::InvalidPipe {
            pipe_code: pipe_code.to_string(),
            reason: "nb_output must be at least 1".to_string(),
        }),
        (Some(_), Some(true)) => Err(DefinitionError::InvalidPipe {
            pipe_code: pipe_code.to_string(),
            reason: "nb_output and multiple_output are exclusive".to_string(),
        }),
        (Some(count), _) => Ok(Multiplicity::Fixed(count)),
        (None, Some(true)) => Ok(Multiplicity::List),
        _ => Ok(declared),
    }
}

/// Names that end up as working-memory entries. `main` is the reserved result alias.
fn check_variable_name(pipe_code: &str, kind: &str, name: &str) -> Result<(), DefinitionError> {
    let reason = if name == MAIN_STUFF_NAME {
        format!("{kind} name '{name}' is reserved")
    } else if !VARIABLE_NAME.is_match(name) {
        format!("invalid {kind} name '{name}'")
    } else {
        return Ok(());
    };
    Err(DefinitionError::InvalidPipe {
        pipe_code: pipe_code.to_string(),
        reason,
    })
}

fn make_batch_params(pipe_code: &str, input_list_name: &str, input_item_name: &str) -> Result<BatchParams, DefinitionError> {
    let invalid = |reason: String| DefinitionError::InvalidPipe {
        pipe_code: pipe_code.to_string(),
        reason,
    };
    for name in [input_list_name, input_item_name] {
        check_variable_name(pipe_code, "batch variable", name)?;
    }
    if input_list_name == input_item_name {
        return Err(invalid("batch list and item names must differ".to_string()));
    }
    Ok(BatchParams {
        input_list_name: input_list_name.to_string(),
        input_item_name: input_item_name.to_string(),
    })
}

fn make_sub_pipe(pipe_code: &str, blueprint: &SubPipeBlueprint) -> Result<SubPipe, DefinitionError> {
    let output_multiplicity = match requested_multiplicity(pipe_code, Multiplicity::Single, blueprint.nb_output, blueprint.multiple_output)? {
        Multiplicity::Single => None,
        other => Some(other),
    };
    let batch_params = match (&blueprint.batch_over, &blueprint.batch_as) {
        (Some(list), Some(item)) => Some(make_batch_params(pipe_code, list, item)?),
        (None, None) => None,
        _ => {
            return Err(DefinitionError::InvalidPipe {
                pipe_code: pipe_code.to_string(),
                reason: format!("step '{}' must set both batch_over and batch_as", blueprint.pipe),
            });
        }
    };
    if let Some(output_name) = &blueprint.result {
        check_variable_name(pipe_code, "result", output_name)?;
    }
    Ok(SubPipe {
        pipe_code: blueprint.pipe.clone(),
        output_name: blueprint.result.clone(),
        output_multiplicity,
        batch_params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::DollarBraceTemplates;
    use pipewright_types::BundleBlueprint;

    fn bundle(yaml: &str) -> BundleBlueprint {
        serde_yaml::from_str(yaml).expect("bundle")
    }

    fn make(bundle: &BundleBlueprint, code: &str) -> Result<Pipe, DefinitionError> {
        make_pipe(&bundle.domain, code, &bundle.pipe[code], &ConceptLibrary::new(), &DollarBraceTemplates)
    }

    #[test]
    fn main_is_reserved_for_results_and_inputs() {
        let bundle = bundle(
            r#"
domain: demo
pipe:
  flow:
    type: PipeSequence
    inputs:
      text: Text
    output: Text
    steps:
      - pipe: echo
        result: main
  echo:
    type: PipeCompose
    inputs:
      main: Text
    output: Text
    template: "${{ main }}"
"#,
        );
        for code in ["flow", "echo"] {
            let error = make(&bundle, code).expect_err("main must be rejected");
            assert!(error.to_string().contains("'main' is reserved"), "{code}: {error}");
        }
    }

    #[test]
    fn builds_operator_with_list_output_override() {
        let bundle = bundle(
            r#"
domain: demo
pipe:
  brainstorm:
    type: PipeLLM
    inputs:
      topic: Text
    output: Text
    prompt_template: "Ideas about ${{ topic }}"
    nb_output: 3
"#,
        );
        let pipe = make(&bundle, "brainstorm").expect("pipe");
        assert_eq!(pipe.output_multiplicity, Multiplicity::Fixed(3));
        assert_eq!(pipe.inputs.get("topic").map(|input| input.concept.code.as_str()), Some("Text"));
        assert_eq!(pipe.type_name(), "PipeLLM");
    }

    #[test]
    fn rejects_bad_codes_and_unknown_concepts() {
        let bundle = bundle(
            r#"
domain: demo
pipe:
  BadCode:
    type: PipeCompose
    output: Text
    template: "x"
  ok_code:
    type: PipeCompose
    inputs:
      thing: Unknown
    output: Text
    template: "x"
"#,
        );
        assert!(matches!(make(&bundle, "BadCode"), Err(DefinitionError::InvalidCode { .. })));
        assert!(matches!(make(&bundle, "ok_code"), Err(DefinitionError::UnknownConcept { .. })));
    }

    #[test]
    fn template_syntax_errors_fail_the_definition() {
        let bundle = bundle(
            r#"
domain: demo
pipe:
  greet:
    type: PipeCompose
    inputs:
      name: Text
    output: Text
    template: "Hello ${{ name"
"#,
        );
        assert!(matches!(make(&bundle, "greet"), Err(DefinitionError::Templating { .. })));
    }

    #[test]
    fn condition_needs_exactly_one_expression_form() {
        let bundle = bundle(
            r#"
domain: demo
pipe:
  route:
    type: PipeCondition
    inputs:
      kind: Text
    output: Text
    outcomes:
      a: continue
    default_outcome: fail
"#,
        );
        assert!(matches!(make(&bundle, "route"), Err(DefinitionError::InvalidPipe { .. })));
    }

    #[test]
    fn step_batch_settings_come_in_pairs() {
        let bundle = bundle(
            r#"
domain: demo
pipe:
  flow:
    type: PipeSequence
    inputs:
      items: Text[]
    output: Text
    steps:
      - pipe: summarize
        batch_over: items
"#,
        );
        assert!(matches!(make(&bundle, "flow"), Err(DefinitionError::InvalidPipe { .. })));
    }
}
