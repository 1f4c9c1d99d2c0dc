use argh::FromArgs;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Algorithm, Params, PasswordHasher, Version};

use crate::command;

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "argon",
    description = "Hash a password for an `[auth.identity]` entry (argon2id)"
)]
pub struct Options {}

pub struct Command {}

impl Command {
    pub fn run() -> Result<(), command::Error> {
        let password = rpassword::prompt_password("Input Password: ")?;
        println!("{}", hash_password(&password)?);
        Ok(())
    }
}

fn hash_password(password: &str) -> Result<String, command::Error> {
    let salt = SaltString::generate(OsRng);

    let argon = argon2::Argon2::new(Algorithm::Argon2id, Version::V0x13, Params::default());
    let hash = argon.hash_password(password.as_bytes(), &salt)?;

    Ok(hash.to_string())
}
