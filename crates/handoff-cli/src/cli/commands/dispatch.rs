use super::super::args::*;
use crate::exit_codes::SUCCESS;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Serve(args) => super::serve::run(args).await,
        Command::Check(args) => super::check::run(args),
        Command::Routes => Ok(super::routes::run()),
        Command::Login(args) => super::login::run(args).await,
        Command::Crew(args) => super::crew::run(args).await,
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(SUCCESS)
        }
    }
}
