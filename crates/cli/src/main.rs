use snd_core::{
    diagnostic::{Diagnostic, Diagnostics, Level},
    remove::{BothRolePolicy, RemoveOptions, RemoveRequest},
};
use std::path::PathBuf;
use std::process::exit;
use std::time::Instant;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "snd4onnx",
    about = "Remove nodes from an ONNX graph and reconnect the surrounding OPs"
)]
pub enum Opt {
    #[structopt(name = "remove")]
    Remove(RemoveOpt),
}

#[derive(Debug, StructOpt)]
pub struct RemoveOpt {
    #[structopt(
        long = "remove_node_names",
        required = true,
        min_values = 1,
        help = "ONNX node names to remove"
    )]
    pub remove_node_names: Vec<String>,

    #[structopt(
        long = "input_onnx_file_path",
        parse(from_os_str),
        help = "Input onnx file path"
    )]
    pub input_onnx_file_path: PathBuf,

    #[structopt(
        long = "output_onnx_file_path",
        parse(from_os_str),
        help = "Output onnx file path"
    )]
    pub output_onnx_file_path: PathBuf,

    #[structopt(long = "non_verbose", help = "Do not show any messages except errors")]
    pub non_verbose: bool,

    #[structopt(
        long = "allow_boundary_nodes",
        help = "Remove OPs connected to both a graph input and a graph output with a warning \
                instead of failing"
    )]
    pub allow_boundary_nodes: bool,

    #[structopt(
        long = "shape_forcing_ops",
        default_value = "Cast",
        help = "OPs whose output shape takes the graph input's shape after a source OP is removed"
    )]
    pub shape_forcing_ops: Vec<String>,

    #[structopt(long = "no_shape_inference", help = "Skip shape reconciliation")]
    pub no_shape_inference: bool,
}

impl RemoveOpt {
    fn options(&self) -> RemoveOptions {
        let policy = if self.allow_boundary_nodes {
            BothRolePolicy::Warn
        } else {
            BothRolePolicy::Reject
        };
        RemoveOptions::default()
            .with_shape_forcing_ops(self.shape_forcing_ops.iter().cloned())
            .with_both_role_policy(policy)
            .with_shape_inference(!self.no_shape_inference)
    }
}

/// Records shown to the user. With `non_verbose` only errors are kept.
fn render(diagnostics: &Diagnostics, non_verbose: bool) -> Vec<&Diagnostic> {
    diagnostics
        .iter()
        .filter(|d| !non_verbose || d.level == Level::Error)
        .collect()
}

fn run(opt: RemoveOpt) -> i32 {
    log::info!(
        "remove: start ({:?}, nodes={:?})",
        opt.input_onnx_file_path,
        opt.remove_node_names
    );
    let start = Instant::now();
    let options = opt.options();
    let mut diagnostics = Diagnostics::default();
    let result = RemoveRequest::new(opt.remove_node_names)
        .with_input_path(opt.input_onnx_file_path)
        .with_output_path(opt.output_onnx_file_path)
        .with_options(options)
        .run_with_diagnostics(&mut diagnostics);
    log::info!("remove: finished in {:?}", start.elapsed());

    let code = match result {
        Ok(_) => {
            diagnostics.info("Finish!");
            0
        }
        Err(e) => {
            diagnostics.push(Level::Error, e.to_string());
            1
        }
    };
    for diagnostic in render(&diagnostics, opt.non_verbose) {
        if diagnostic.level == Level::Error {
            eprintln!("{diagnostic}");
        } else {
            println!("{diagnostic}");
        }
    }
    code
}

fn main() {
    env_logger::init();

    let Opt::Remove(opt) = Opt::from_args();
    exit(run(opt));
}
