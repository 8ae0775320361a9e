fn main() {
    spectra_pipeline::cli::run();
}
