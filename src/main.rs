fn main() -> Result<(), Box<dyn std::error::Error>> {
    pagecheck::cli::run()
}
