pub mod elafros;
pub mod istio;
