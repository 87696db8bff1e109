//! Leaf pipes. Each operator turns memory into one content value through the content generator,
//! a registered function, or a template.

use std::sync::Arc;

use tracing::debug;

use super::layer;
use crate::backend::{ContentGenerator, DocumentSource, ObjectSchema};
use crate::concept::{Concept, NativeConceptCode};
use crate::context::PipelineContext;
use crate::content::{LlmPromptContent, StuffContent};
use crate::dry_run::placeholder_stuff;
use crate::error::{BackendError, PipeRunError, WorkingMemoryError};
use crate::memory::WorkingMemory;
use crate::pipe::{
    ExtractOperator, FuncOperator, ImgGenOperator, InputRequirement, LlmOperator, Multiplicity, Pipe, PipeOperator, PipeOutput,
    PipeRunParams,
};
use crate::resolver::media_inputs;
use crate::structure::TEXT_CONTENT;
use crate::stuff::Stuff;
use crate::tracker::{TrackerEvent, emit};

pub(super) async fn run_operator(
    ctx: &Arc<PipelineContext>,
    pipe: &Pipe,
    operator: &PipeOperator,
    memory: WorkingMemory,
    params: PipeRunParams,
    output_name: Option<&str>,
) -> Result<PipeOutput, PipeRunError> {
    let generator = ctx.generator_for(params.mode);
    let concept = output_concept(ctx, pipe, &params)?;
    let multiplicity = params.output_multiplicity.unwrap_or(pipe.output_multiplicity);

    let content = match operator {
        PipeOperator::Llm(llm) => run_llm(ctx, pipe, llm, &memory, generator.as_ref(), &concept, multiplicity).await?,
        PipeOperator::ImgGen(img_gen) => run_img_gen(ctx, pipe, img_gen, &memory, generator.as_ref(), multiplicity).await?,
        PipeOperator::Extract(extract) => run_extract(pipe, extract, &memory, generator.as_ref(), multiplicity).await?,
        PipeOperator::Func(func) => run_func(ctx, pipe, func, &memory, &params, &concept, multiplicity)?,
        PipeOperator::Compose(compose) => StuffContent::text(ctx.templates.render(&compose.template, &memory)?),
    };

    let name = output_name.unwrap_or(&pipe.code).to_string();
    let mut memory = memory;
    let stored = memory.set_new_main_stuff(Stuff::new(name, concept, content), output_name)?;
    emit(
        ctx.tracker.as_ref(),
        TrackerEvent::PipeStep {
            pipe_code: pipe.code.clone(),
            layer: layer(&params),
            from_stuff: pipe.inputs.names(),
            to_stuff: stored,
        },
    );
    Ok(PipeOutput::new(memory))
}

/// Declared output, or the concept requested for a `Dynamic` output.
fn output_concept(ctx: &PipelineContext, pipe: &Pipe, params: &PipeRunParams) -> Result<Arc<Concept>, PipeRunError> {
    match (&params.dynamic_output_concept, pipe.output.native_code()) {
        (Some(reference), Some(NativeConceptCode::Dynamic)) => ctx
            .libraries
            .concepts()
            .resolve_reference(reference, &pipe.domain)
            .ok_or_else(|| PipeRunError::UnknownConcept {
                pipe_code: pipe.code.clone(),
                reference: reference.clone(),
            }),
        _ => Ok(pipe.output.clone()),
    }
}

fn backend_error(pipe: &Pipe) -> impl Fn(BackendError) -> PipeRunError + '_ {
    move |source| PipeRunError::Backend {
        pipe_code: pipe.code.clone(),
        source,
    }
}

fn requested_count(multiplicity: Multiplicity) -> Option<usize> {
    match multiplicity {
        Multiplicity::Single => Some(1),
        Multiplicity::List => None,
        Multiplicity::Fixed(count) => Some(count),
    }
}

/// A fixed multiplicity needs exactly that many results back from the generator.
fn check_count(pipe: &Pipe, operation: &str, multiplicity: Multiplicity, received: usize) -> Result<(), PipeRunError> {
    match multiplicity {
        Multiplicity::Fixed(expected) if expected != received => Err(backend_error(pipe)(BackendError::Generation {
            operation: operation.to_string(),
            message: format!("expected {expected} results, got {received}"),
        })),
        _ => Ok(()),
    }
}

fn build_prompt(ctx: &PipelineContext, pipe: &Pipe, llm: &LlmOperator, memory: &WorkingMemory) -> Result<LlmPromptContent, PipeRunError> {
    let user_text = ctx.templates.render(&llm.prompt_template, memory)?;
    let system_text = match &llm.system_prompt {
        Some(system_prompt) => Some(ctx.templates.render(system_prompt, memory)?),
        None => ctx.domain_system_prompt(&pipe.domain).map(str::to_string),
    };
    let mut user_images = Vec::new();
    for name in media_inputs(&ctx.libraries, pipe) {
        user_images.extend(memory.get_stuff(&name)?.content.images());
    }
    Ok(LlmPromptContent {
        system_text,
        user_text: Some(user_text),
        user_images,
    })
}

async fn run_llm(
    ctx: &PipelineContext,
    pipe: &Pipe,
    llm: &LlmOperator,
    memory: &WorkingMemory,
    generator: &dyn ContentGenerator,
    concept: &Concept,
    multiplicity: Multiplicity,
) -> Result<StuffContent, PipeRunError> {
    let prompt = build_prompt(ctx, pipe, llm, memory)?;
    let structures = ctx.libraries.structures();
    let structure_name = if concept.is_wildcard() {
        TEXT_CONTENT
    } else {
        concept.structure_name.as_str()
    };
    debug!(pipe_code = %pipe.code, structure = structure_name, %multiplicity, "llm generation");

    match multiplicity {
        Multiplicity::Single if structure_name == TEXT_CONTENT => {
            let text = generator.generate_text(&prompt).await.map_err(backend_error(pipe))?;
            Ok(StuffContent::text(text))
        }
        Multiplicity::Single => {
            let schema = ObjectSchema::of(structure_name, structures);
            let object = generator.generate_object(&prompt, &schema).await.map_err(backend_error(pipe))?;
            Ok(StuffContent::from_record(structure_name, &object, structures)?)
        }
        multiple => {
            let schema = ObjectSchema::of(structure_name, structures);
            let objects = generator
                .generate_objects(&prompt, &schema, requested_count(multiple))
                .await
                .map_err(backend_error(pipe))?;
            check_count(pipe, "structured generation", multiple, objects.len())?;
            let items = objects
                .iter()
                .map(|object| StuffContent::from_record(structure_name, object, structures))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(StuffContent::list(items))
        }
    }
}

async fn run_img_gen(
    ctx: &PipelineContext,
    pipe: &Pipe,
    img_gen: &ImgGenOperator,
    memory: &WorkingMemory,
    generator: &dyn ContentGenerator,
    multiplicity: Multiplicity,
) -> Result<StuffContent, PipeRunError> {
    let prompt = match &img_gen.prompt_template {
        Some(template) => ctx.templates.render(template, memory)?,
        None => memory.get_stuff(&single_input(pipe)?.variable_name)?.content.render_text(),
    };
    let count = requested_count(multiplicity).unwrap_or(1);
    let mut images = generator.generate_images(&prompt, count).await.map_err(backend_error(pipe))?;
    check_count(pipe, "image generation", multiplicity, images.len())?;

    if multiplicity == Multiplicity::Single {
        if images.is_empty() {
            return Err(backend_error(pipe)(BackendError::Generation {
                operation: "image generation".to_string(),
                message: "no image returned".to_string(),
            }));
        }
        return Ok(StuffContent::Image(images.swap_remove(0)));
    }
    Ok(StuffContent::list(images.into_iter().map(StuffContent::Image).collect()))
}

async fn run_extract(
    pipe: &Pipe,
    extract: &ExtractOperator,
    memory: &WorkingMemory,
    generator: &dyn ContentGenerator,
    multiplicity: Multiplicity,
) -> Result<StuffContent, PipeRunError> {
    let input = single_input(pipe)?;
    let stuff = memory.get_stuff(&input.variable_name)?;
    let document = match &stuff.content {
        StuffContent::Image(image) => DocumentSource::Image { url: image.url.clone() },
        StuffContent::Pdf { url } => DocumentSource::Pdf { url: url.clone() },
        other => {
            return Err(WorkingMemoryError::TypeMismatch {
                variable: input.variable_name.clone(),
                expected: "image or pdf".to_string(),
                actual: other.kind_name().to_string(),
            }
            .into());
        }
    };
    let mut pages = generator
        .extract_pages(&document, extract.page_views)
        .await
        .map_err(backend_error(pipe))?;

    if multiplicity == Multiplicity::Single {
        if pages.is_empty() {
            return Err(backend_error(pipe)(BackendError::Generation {
                operation: "page extraction".to_string(),
                message: format!("no page extracted from '{}'", document.url()),
            }));
        }
        return Ok(StuffContent::Page(pages.swap_remove(0)));
    }
    Ok(StuffContent::list(pages.into_iter().map(StuffContent::Page).collect()))
}

/// Registered functions are only called in live runs; dry runs get a placeholder of the output.
fn run_func(
    ctx: &PipelineContext,
    pipe: &Pipe,
    func: &FuncOperator,
    memory: &WorkingMemory,
    params: &PipeRunParams,
    concept: &Arc<Concept>,
    multiplicity: Multiplicity,
) -> Result<StuffContent, PipeRunError> {
    if params.is_dry() {
        let placeholder = placeholder_stuff(
            &pipe.code,
            concept.clone(),
            multiplicity,
            ctx.libraries.structures(),
            ctx.config.dry_run_list_size,
        )?;
        return Ok(placeholder.content);
    }
    let function = ctx.functions.get(&func.function_name).ok_or_else(|| PipeRunError::FunctionNotFound {
        pipe_code: pipe.code.clone(),
        function_name: func.function_name.clone(),
    })?;
    function(memory).map_err(|source| PipeRunError::Function {
        pipe_code: pipe.code.clone(),
        function_name: func.function_name.clone(),
        source,
    })
}

fn single_input(pipe: &Pipe) -> Result<&InputRequirement, PipeRunError> {
    pipe.inputs.iter().next().ok_or_else(|| {
        WorkingMemoryError::InvalidInput {
            name: pipe.code.clone(),
            message: "pipe declares no input".to_string(),
        }
        .into()
    })
}
