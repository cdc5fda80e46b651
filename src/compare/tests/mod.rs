mod correctness;
mod helpers;
