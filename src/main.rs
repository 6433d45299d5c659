use burn::backend::{NdArray, ndarray::NdArrayDevice};
use rust_pose::{
    commands,
    config::{Commands, HEAD_CONFIG_PATH, PoseCmd},
};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    type Backend = NdArray<f32>;
    let device = NdArrayDevice::default();

    let cli_cmd: PoseCmd = argh::from_env();

    let result = match cli_cmd.commands {
        Commands::Check(sub_command_check) => {
            let config_path = sub_command_check.c.as_deref().unwrap_or(HEAD_CONFIG_PATH);
            commands::check::<Backend>(config_path, &device)
        }
        Commands::Roundtrip(sub_command_roundtrip) => {
            let config_path = sub_command_roundtrip.c.as_deref().unwrap_or(HEAD_CONFIG_PATH);
            commands::roundtrip::<Backend>(config_path, &sub_command_roundtrip.k, &device).and_then(|instances| {
                println!("{}", serde_json::to_string_pretty(&instances)?);
                Ok(())
            })
        }
    };

    if let Err(e) = result {
        log::error!("{e}");
        std::process::exit(1);
    }
}
