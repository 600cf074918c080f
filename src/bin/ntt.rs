//! Process entry point: parses arguments, runs the requested command, and
//! translates the result into the process exit code (§6).

#[tokio::main]
async fn main() {
	let code = ntt::cli::run().await;
	std::process::exit(code);
}
