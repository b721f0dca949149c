use std::env;
use unwoff2::decode;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        eprintln!("usage: unwoff2 <font.woff2> <font.ttf>");
        std::process::exit(2);
    }

    let data = std::fs::read(&args[1]).unwrap();
    let ttf = decode(&data).unwrap();
    std::fs::write(&args[2], ttf).unwrap();
}
