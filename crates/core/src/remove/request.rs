use std::path::{Path, PathBuf};

use crate::{
    diagnostic::Diagnostics,
    error::{RemoveError, ValidationError},
    model::Model,
    onnx::{load_onnx, save_onnx},
    shape::ForwardShapeInference,
};

use super::{plan_removal_with_diagnostics, RemoveOptions, Report};

/// A deletion request against either a file or an in-memory model.
///
/// ```no_run
/// use snd_core::remove::RemoveRequest;
///
/// let (_model, report) = RemoveRequest::new(["Transpose_0"])
///     .with_input_path("in.onnx")
///     .with_output_path("out.onnx")
///     .run()
///     .unwrap();
/// for diagnostic in report.diagnostics.iter() {
///     println!("{diagnostic}");
/// }
/// ```
#[derive(Debug, Default)]
pub struct RemoveRequest {
    names: Vec<String>,
    input_path: Option<PathBuf>,
    model: Option<Model>,
    output_path: Option<PathBuf>,
    options: RemoveOptions,
}

impl RemoveRequest {
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_input_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_path = Some(path.into());
        self
    }

    pub fn with_model(mut self, model: Model) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_options(mut self, options: RemoveOptions) -> Self {
        self.options = options;
        self
    }

    /// Loads the model if needed, removes the nodes, and saves the result if an
    /// output path was given. Nothing is written unless the removal succeeds.
    pub fn run(self) -> Result<(Model, Report), RemoveError> {
        self.run_with_diagnostics(&mut Diagnostics::default())
    }

    /// Same as [`RemoveRequest::run`], but the events raised before a failure stay
    /// readable in `diagnostics`.
    pub fn run_with_diagnostics(
        self,
        diagnostics: &mut Diagnostics,
    ) -> Result<(Model, Report), RemoveError> {
        let mut model = match (self.model, self.input_path) {
            (Some(_), Some(_)) => return Err(ValidationError::ConflictingInputs.into()),
            (None, None) => return Err(ValidationError::NoInput.into()),
            (Some(model), None) => model,
            (None, Some(path)) => {
                validate_onnx_path(&path)?;
                load_onnx(&path)?
            }
        };

        let report = plan_removal_with_diagnostics(
            &model,
            &self.names,
            &self.options,
            &ForwardShapeInference::default(),
            diagnostics,
        )?
        .commit(&mut model);

        if let Some(path) = &self.output_path {
            save_onnx(&model, path)?;
            log::debug!("saved model to {}", path.display());
        }

        Ok((model, report))
    }
}

/// Checks that `path` names an existing `.onnx` file.
pub fn validate_onnx_path(path: &Path) -> Result<(), ValidationError> {
    if !path.is_file() {
        return Err(ValidationError::FileNotFound(path.to_owned()));
    }
    if path.extension().and_then(|e| e.to_str()) != Some("onnx") {
        return Err(ValidationError::NotOnnxFile(path.to_owned()));
    }
    Ok(())
}
