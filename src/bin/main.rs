fn main() {
    cnproxy::main()
}
