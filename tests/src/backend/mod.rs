mod call;
mod constraint;
mod liveness;
