use roundtable::app::run_cli;

fn output_header() -> &'static str {
    "Roundtable\nRoundtable drives a goal through a sequence of assistant roles, one subprocess per role."
}

fn main() {
    println!("{}\n", output_header());
    let args: Vec<String> = std::env::args().skip(1).collect();
    let exit = run_cli(args);
    if exit.code == 0 {
        println!("{}", exit.output);
    } else {
        eprintln!("{}", exit.output);
    }
    std::process::exit(exit.code);
}
