// =============================================================================
// Exec - Compiling and running wrapped models
// =============================================================================
//
// This module is the orchestration layer. A wrapper binds each call's
// arguments, compiles the model the first time it is called and afterwards
// only executes, keeping host and device weights and the device optimizer
// in step:
//
//   call args → bind → (first call) trace view → capture → compile
//                    → sync weights → execute → unpack
//
// USAGE:
//   let runtime = Rc::new(MyRuntime::connect()?);
//   let model = ModelRef::new(MyModel::new());
//
//   let mut train = training_model(runtime.clone(), model.clone(), Options::new(), Some(loss), None)?;
//   let mut infer = inference_model(runtime, model, Options::new())?;
//
//   let output_and_loss = train.call(&CallArgs::new().arg(x).arg(y))?;
//   let prediction = infer.call(&CallArgs::new().arg(x))?;

mod engine;
mod train;

pub use engine::{inference_model, Executor, InferenceModel, Output};
pub use train::{training_model, Loss, TrainingModel, TrainingWrapper, DEFAULT_LEARNING_RATE};
