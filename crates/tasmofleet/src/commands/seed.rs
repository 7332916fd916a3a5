use tasmo_config::load_seed;

use crate::cli::CheckSeedArgs;
use crate::error::CliError;

pub fn handle(args: &CheckSeedArgs) -> Result<(), CliError> {
    let seed = load_seed(&args.file).map_err(|source| CliError::Seed {
        path: args.file.clone(),
        source,
    })?;
    println!(
        "{}: {} templates, {} device configurations",
        args.file.display(),
        seed.templates.len(),
        seed.configurations.len()
    );
    Ok(())
}
