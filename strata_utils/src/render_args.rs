use argh::FromArgs;
use std::sync::LazyLock;

fn positive_f32(value: &str) -> Result<f32, String> {
    let parsed: f32 = value
        .parse()
        .map_err(|e| format!("expected a number, got {value:?}: {e}"))?;
    if parsed.is_finite() && parsed > 0.0 {
        Ok(parsed)
    } else {
        Err(format!("expected a positive number, got {parsed}"))
    }
}

/// Renderer arguments
#[derive(Debug, Default, FromArgs)]
pub struct RenderArgs {
    #[argh(switch, hidden_help)]
    pub no_frustum_culling: bool,
    #[argh(switch, hidden_help)]
    pub gpu_diagnostics: bool,

    #[argh(option, hidden_help, from_str_fn(positive_f32))]
    pub near: Option<f32>,
    #[argh(option, hidden_help, from_str_fn(positive_f32))]
    pub far: Option<f32>,
    #[argh(option, hidden_help, from_str_fn(positive_f32))]
    pub pick_region: Option<f32>,
    #[argh(option, hidden_help)]
    pub hit_capacity: Option<usize>,
}

impl RenderArgs {
    fn init() -> Option<RenderArgs> {
        let mut args = std::env::args();
        let cmd_name = args.next()?;
        let args: Vec<String> = args.collect();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        RenderArgs::from_args(&[&cmd_name], &args).ok()
    }

    /// Arguments of the running process, parsed once. Unparsable arguments fall back to defaults.
    pub fn get() -> &'static RenderArgs {
        static INSTANCE: LazyLock<RenderArgs> =
            LazyLock::new(|| RenderArgs::init().unwrap_or_default());
        &INSTANCE
    }
}
