use crate::exit_codes;

pub fn run() -> i32 {
    for (method, path, description) in handoff_mcp_server::routes() {
        println!("{method:<6} {path:<45} {description}");
    }
    exit_codes::SUCCESS
}
